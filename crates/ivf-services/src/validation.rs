//! 输入校验

use ivf_core::FieldError;

pub const REQUIRED: &str = "This field is required.";
pub const BLANK: &str = "This field may not be blank.";

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// 清理姓名字段：去除首尾空白并检查长度
///
/// `required` 为真时空值报错；否则空值返回 `Ok(None)`。
pub fn clean_name(
    field: &str,
    value: Option<&str>,
    max_len: usize,
    required: bool,
) -> Result<Option<String>, FieldError> {
    let value = value.map(str::trim);
    match value {
        None if required => Err(FieldError::new(field, REQUIRED)),
        Some("") if required => Err(FieldError::new(field, BLANK)),
        None | Some("") => Ok(None),
        Some(v) if v.chars().count() > max_len => Err(FieldError::new(
            field,
            format!("Ensure this field has no more than {} characters.", max_len),
        )),
        Some(v) => Ok(Some(v.to_string())),
    }
}

/// 口令强度检查，返回全部不满足的规则
pub fn password_problems(password: &str, email: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(FieldError::new(
            "password",
            format!(
                "This password is too short. It must contain at least {} characters.",
                MIN_PASSWORD_LENGTH
            ),
        ));
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        errors.push(FieldError::new("password", "This password is entirely numeric."));
    }

    let local = email.split('@').next().unwrap_or_default();
    if !password.is_empty()
        && (password.eq_ignore_ascii_case(email) || password.eq_ignore_ascii_case(local))
    {
        errors.push(FieldError::new(
            "password",
            "The password is too similar to the email address.",
        ));
    }

    errors
}
