//! 通用工具函数

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// 推荐令牌长度（字符）
pub const REFERRAL_TOKEN_LENGTH: usize = 32;

/// 推荐令牌的随机字节数，24 字节经 URL 安全 base64 编码后正好 32 个字符
const REFERRAL_TOKEN_BYTES: usize = 24;

/// 默认 PBKDF2 迭代次数
pub const DEFAULT_PASSWORD_ITERATIONS: u32 = 600_000;

const PASSWORD_SALT_LENGTH: usize = 16;
const PASSWORD_HASH_LENGTH: usize = 32;
const PASSWORD_SCHEME: &str = "pbkdf2_sha256";

/// 生成推荐令牌（URL 安全、定长、由操作系统随机源产生）
pub fn generate_referral_token() -> String {
    let mut bytes = [0u8; REFERRAL_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 判断字符串是否符合推荐令牌格式
pub fn is_referral_token_format(value: &str) -> bool {
    value.len() == REFERRAL_TOKEN_LENGTH
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// 生成登录会话令牌（32 字节熵）
pub fn generate_session_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 会话令牌的 SHA-256 摘要（十六进制），数据库中只保存摘要
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 规范化邮箱：去除首尾空白，域名部分转小写
pub fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim();
    let (local, domain) = email.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || email.contains(' ') {
        return None;
    }
    Some(format!("{}@{}", local, domain.to_ascii_lowercase()))
}

/// PBKDF2-HMAC-SHA256 口令哈希
///
/// 编码格式：`pbkdf2_sha256$<iterations>$<salt>$<hash>`
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: u32,
}

impl PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    pub fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; PASSWORD_SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        let hash = derive(password, &salt, self.iterations);

        format!(
            "{}${}${}${}",
            PASSWORD_SCHEME,
            self.iterations,
            URL_SAFE_NO_PAD.encode(salt),
            URL_SAFE_NO_PAD.encode(hash)
        )
    }

    /// 校验口令；迭代次数取自编码串本身
    pub fn verify(&self, password: &str, encoded: &str) -> bool {
        let parts: Vec<&str> = encoded.split('$').collect();
        let [scheme, iterations, salt, expected] = parts.as_slice() else {
            return false;
        };
        if *scheme != PASSWORD_SCHEME {
            return false;
        }

        let (Ok(iterations), Ok(salt), Ok(expected)) = (
            iterations.parse::<u32>(),
            URL_SAFE_NO_PAD.decode(salt),
            URL_SAFE_NO_PAD.decode(expected),
        ) else {
            return false;
        };

        let actual = derive(password, &salt, iterations);
        actual[..].ct_eq(expected.as_slice()).into()
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_PASSWORD_ITERATIONS)
    }
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; PASSWORD_HASH_LENGTH] {
    let mut out = [0u8; PASSWORD_HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}
