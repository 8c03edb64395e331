use std::{io::ErrorKind, path::PathBuf};

use actix_web::{get, web, HttpResponse, Responder};
use async_trait::async_trait;
use bytesize::ByteSize;
use futures_util::{stream::LocalBoxStream, TryStreamExt as _};
use log::{debug, info, warn};
use mime::Mime;
use tokio::{fs, io::AsyncWriteExt};

use crate::{config::MAX_UPLOAD_SIZE, error::AppError, util};

/// Declared content types a post may carry.
pub const ALLOWED_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "video/mp4",
    "video/avi",
    "video/mov",
    "video/webm",
];

pub type ByteStream<'a> = LocalBoxStream<'a, Result<web::Bytes, AppError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub name: String,
    pub size: u64,
}

/// Where post attachments are kept.
#[async_trait(?Send)]
pub trait MediaIntake: Send + Sync {
    /// Validates and stores one file. Nothing is written for a rejected type or declared size.
    async fn accept(
        &self,
        original_name: &str,
        declared_type: &str,
        declared_size: Option<u64>,
        data: ByteStream<'_>,
    ) -> Result<StoredMedia, AppError>;

    /// Removes a file stored by `accept` whose post was never written.
    async fn discard(&self, name: &str) -> Result<(), AppError>;

    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>, AppError>;
}

pub fn check_type(declared: &str) -> Result<(), AppError> {
    let essence = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if ALLOWED_TYPES.contains(&essence.as_str()) {
        Ok(())
    } else {
        Err(AppError::UnsupportedMediaType(if declared.is_empty() {
            "none declared".into()
        } else {
            declared.to_owned()
        }))
    }
}

pub fn too_large() -> AppError {
    AppError::PayloadTooLarge(ByteSize::b(MAX_UPLOAD_SIZE).to_string_as(true))
}

pub fn check_size(size: u64) -> Result<(), AppError> {
    if size > MAX_UPLOAD_SIZE {
        Err(too_large())
    } else {
        Ok(())
    }
}

async fn write_chunks(file: &mut fs::File, mut data: ByteStream<'_>) -> Result<u64, AppError> {
    let mut size = 0u64;

    while let Some(chunk) = data.try_next().await? {
        size += chunk.len() as u64;
        check_size(size)?;

        file.write_all(&chunk).await?;
    }

    if size == 0 {
        return Err(AppError::validation("media: file is empty"));
    }

    file.flush().await?;

    Ok(size)
}

pub struct DiskMediaIntake {
    dir: PathBuf,
}

impl DiskMediaIntake {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DiskMediaIntake { dir: dir.into() }
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, AppError> {
        if util::is_stored_name(name) {
            Ok(self.dir.join(name))
        } else {
            Err(AppError::NotFound)
        }
    }
}

#[async_trait(?Send)]
impl MediaIntake for DiskMediaIntake {
    async fn accept(
        &self,
        original_name: &str,
        declared_type: &str,
        declared_size: Option<u64>,
        data: ByteStream<'_>,
    ) -> Result<StoredMedia, AppError> {
        check_type(declared_type)?;

        if let Some(size) = declared_size {
            check_size(size)?;
        }

        // no-op when another request created it first
        fs::create_dir_all(&self.dir).await?;

        let name = util::stored_name(original_name, util::monotonic_now());
        let path = self.dir.join(&name);

        let file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(x) => x,
            Err(x) if x.kind() == ErrorKind::AlreadyExists => {
                warn!("refusing to overwrite existing media {name}");
                return Err(AppError::Conflict("media name collision, retry".into()));
            }
            Err(x) => return Err(x.into()),
        };

        // only fires when the request is dropped mid-upload; closes the file before unlinking
        let mut staged = scopeguard::guard((file, path), |(file, path)| {
            drop(file);
            if let Err(err) = std::fs::remove_file(&path) {
                warn!("unable to remove abandoned upload {}: {err}", path.display());
            }
        });

        let written = write_chunks(&mut staged.0, data).await;

        let (file, path) = scopeguard::ScopeGuard::into_inner(staged);
        drop(file);

        let size = match written {
            Ok(x) => x,
            Err(x) => {
                if let Err(err) = fs::remove_file(&path).await {
                    warn!("unable to remove partial upload {}: {err}", path.display());
                }
                return Err(x);
            }
        };

        info!(
            "stored media {} ({}, {declared_type})",
            path.display(),
            ByteSize::b(size)
        );

        Ok(StoredMedia { name, size })
    }

    async fn discard(&self, name: &str) -> Result<(), AppError> {
        match fs::remove_file(self.path_of(name)?).await {
            Ok(_) => {
                debug!("discarded media {name}");
                Ok(())
            }
            Err(x) if x.kind() == ErrorKind::NotFound => Ok(()),
            Err(x) => Err(x.into()),
        }
    }

    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>, AppError> {
        match fs::read(self.path_of(name)?).await {
            Ok(x) => Ok(Some(x)),
            Err(x) if x.kind() == ErrorKind::NotFound => Ok(None),
            Err(x) => Err(x.into()),
        }
    }
}

pub fn content_type_for(name: &str) -> Mime {
    let extension = name
        .rsplit_once('.')
        .map(|(_, x)| x.to_ascii_lowercase())
        .unwrap_or_default();

    let mime = match extension.as_str() {
        "jpg" | "jpeg" => return mime::IMAGE_JPEG,
        "png" => return mime::IMAGE_PNG,
        "gif" => return mime::IMAGE_GIF,
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        _ => return mime::APPLICATION_OCTET_STREAM,
    };

    mime.parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

#[get("/uploads/{name}")]
async fn get(
    intake: web::Data<dyn MediaIntake>,
    name: web::Path<String>,
) -> Result<impl Responder, AppError> {
    let name = name.into_inner();
    let file = intake.load(&name).await?.ok_or(AppError::NotFound)?;

    let mime = content_type_for(&name);

    Ok(HttpResponse::Ok()
        .append_header((
            "Content-Disposition",
            format!(
                "{}; filename=\"{}\"",
                if mime == mime::APPLICATION_OCTET_STREAM {
                    "attachment"
                } else {
                    "inline"
                },
                name
            ),
        ))
        .content_type(mime)
        .body(file))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(get);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, StreamExt as _};

    fn chunks(chunks: Vec<Vec<u8>>) -> ByteStream<'static> {
        stream::iter(chunks.into_iter().map(|x| Ok(web::Bytes::from(x)))).boxed_local()
    }

    async fn files_in(dir: &std::path::Path) -> Vec<String> {
        let mut names = Vec::new();

        if let Ok(mut entries) = fs::read_dir(dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        names
    }

    #[test]
    fn allow_list() {
        for x in ALLOWED_TYPES {
            check_type(x).unwrap();
        }
        check_type("IMAGE/PNG").unwrap();
        check_type("video/webm; codecs=vp9").unwrap();

        assert!(matches!(
            check_type("application/pdf"),
            Err(AppError::UnsupportedMediaType(_))
        ));
        check_type("").unwrap_err();
        check_type("image/svg+xml").unwrap_err();
    }

    #[test]
    fn size_limit() {
        check_size(MAX_UPLOAD_SIZE).unwrap();
        assert!(matches!(
            check_size(MAX_UPLOAD_SIZE + 1),
            Err(AppError::PayloadTooLarge(_))
        ));
    }

    #[actix_web::test]
    async fn stores_file_under_generated_name() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("uploads");
        let intake = DiskMediaIntake::new(&dir);

        let stored = intake
            .accept("my cat.png", "image/png", Some(6), chunks(vec![b"abc".to_vec(), b"def".to_vec()]))
            .await
            .unwrap();

        assert!(stored.name.ends_with("_my_cat.png"));
        assert_eq!(stored.size, 6);
        assert_eq!(fs::read(dir.join(&stored.name)).await.unwrap(), b"abcdef");
        assert_eq!(intake.load(&stored.name).await.unwrap().unwrap(), b"abcdef");
    }

    #[actix_web::test]
    async fn disallowed_type_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("uploads");
        let intake = DiskMediaIntake::new(&dir);

        let err = intake
            .accept("doc.pdf", "application/pdf", Some(3), chunks(vec![b"%PD".to_vec()]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UnsupportedMediaType(_)));
        // rejected before the directory was even created
        assert!(!dir.exists());
    }

    #[actix_web::test]
    async fn declared_oversize_is_rejected_up_front() {
        let tmp = tempfile::tempdir().unwrap();
        let intake = DiskMediaIntake::new(tmp.path());

        let err = intake
            .accept("big.png", "image/png", Some(20 * 1024 * 1024), chunks(vec![]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::PayloadTooLarge(_)));
        assert!(files_in(tmp.path()).await.is_empty());
    }

    #[actix_web::test]
    async fn oversize_stream_is_cut_off_and_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let intake = DiskMediaIntake::new(tmp.path());

        // 20 MiB in 1 MiB chunks, size not declared
        let data = (0..20).map(|_| vec![0u8; 1024 * 1024]).collect();

        let err = intake
            .accept("big.png", "image/png", None, chunks(data))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::PayloadTooLarge(_)));
        assert!(files_in(tmp.path()).await.is_empty());
    }

    #[actix_web::test]
    async fn failed_stream_leaves_no_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let intake = DiskMediaIntake::new(tmp.path());

        let data = stream::iter(vec![
            Ok(web::Bytes::from_static(b"partial")),
            Err(AppError::validation("connection reset")),
        ])
        .boxed_local();

        intake
            .accept("clip.mp4", "video/mp4", None, data)
            .await
            .unwrap_err();

        assert!(files_in(tmp.path()).await.is_empty());
    }

    #[actix_web::test]
    async fn abandoned_upload_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let intake = DiskMediaIntake::new(tmp.path());

        // the client stalls after the first chunk and the request is dropped
        let data = stream::iter(vec![Ok(web::Bytes::from_static(b"partial"))])
            .chain(stream::pending())
            .boxed_local();

        let upload = intake.accept("clip.mp4", "video/mp4", None, data);
        tokio::time::timeout(std::time::Duration::from_millis(100), upload)
            .await
            .unwrap_err();

        assert!(files_in(tmp.path()).await.is_empty());
    }

    #[actix_web::test]
    async fn concurrent_first_use_creates_directory_once() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("fresh");
        let intake = DiskMediaIntake::new(&dir);

        let results = futures_util::future::join_all((0..8).map(|i| {
            intake.accept(
                "same.gif",
                "image/gif",
                None,
                chunks(vec![format!("gif{i}").into_bytes()]),
            )
        }))
        .await;

        let stored: Vec<_> = results.into_iter().map(|x| x.unwrap()).collect();
        let mut names: Vec<_> = stored.iter().map(|x| x.name.clone()).collect();
        names.sort();
        names.dedup();

        assert_eq!(names.len(), 8);
        assert_eq!(files_in(&dir).await.len(), 8);
    }

    #[actix_web::test]
    async fn discard_and_load_reject_foreign_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let intake = DiskMediaIntake::new(tmp.path());

        let stored = intake
            .accept("a.jpg", "image/jpeg", None, chunks(vec![vec![1, 2, 3]]))
            .await
            .unwrap();

        assert!(matches!(
            intake.load("../etc/passwd").await,
            Err(AppError::NotFound)
        ));
        assert_eq!(intake.load("missing.jpg").await.unwrap(), None);

        intake.discard(&stored.name).await.unwrap();
        intake.discard(&stored.name).await.unwrap();

        assert!(files_in(tmp.path()).await.is_empty());
    }

    #[test]
    fn content_types_from_extension() {
        assert_eq!(content_type_for("x_photo.JPG"), mime::IMAGE_JPEG);
        assert_eq!(content_type_for("x_clip.webm").essence_str(), "video/webm");
        assert_eq!(content_type_for("x_noext"), mime::APPLICATION_OCTET_STREAM);
    }
}
