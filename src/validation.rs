pub const MIN_PASSWORD_LEN: usize = 6;

pub fn username(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("username: required");
    }

    if name.chars().count() > 64 {
        return Err("username: too long");
    }

    if name.chars().any(|x| x.is_whitespace() || x.is_control()) {
        return Err("username: disallowed characters");
    }

    Ok(())
}

pub fn email(email: &str) -> Result<(), &'static str> {
    if email.is_empty() {
        return Err("email: required");
    }

    if email.chars().count() > 254 {
        return Err("email: too long");
    }

    if !email.contains('@') || email.chars().any(|x| x.is_whitespace() || x.is_control()) {
        return Err("email: invalid address");
    }

    Ok(())
}

pub fn password(password: &str) -> Result<(), &'static str> {
    let len = password.chars().count();

    if len < MIN_PASSWORD_LEN {
        return Err("password: too short");
    }

    // argon2 cost grows with input length
    if len > 1024 {
        return Err("password: too long");
    }

    Ok(())
}

/// Trimmed post body, or an error when nothing is left.
pub fn post_content(content: &str) -> Result<&str, &'static str> {
    let content = content.trim();

    if content.is_empty() {
        return Err("content: post cannot be empty");
    }

    Ok(content)
}

#[test]
fn username_validation() {
    username("alice").unwrap();
    username("RealMan420").unwrap();
    username("g3n1u5_.-").unwrap();
    username("").unwrap_err();
    username("two words").unwrap_err();
    username("normalname\n").unwrap_err();
    username(&"x".repeat(65)).unwrap_err();
}

#[test]
fn email_validation() {
    email("a@x.com").unwrap();
    email("").unwrap_err();
    email("not-an-address").unwrap_err();
    email("a @x.com").unwrap_err();
}

#[test]
fn password_validation() {
    password("secret1").unwrap();
    password("123456").unwrap();
    password("12345").unwrap_err();
    password("").unwrap_err();
    password(&"p".repeat(1025)).unwrap_err();
}

#[test]
fn post_content_validation() {
    assert_eq!(post_content("  hello \n").unwrap(), "hello");
    post_content("").unwrap_err();
    post_content(" \t\n ").unwrap_err();
}
