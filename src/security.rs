//! Local security material: an AES-256-GCM key for secrets at rest and a
//! self-signed certificate, plus audits of config files.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit, Nonce};
use anyhow::{Context, Result};
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509NameBuilder, X509};
use rand::RngCore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::SecurityConfig;
use crate::error::WarpError;
use crate::wgcf::set_mode;

pub const KEY_FILE: &str = "encryption_key.bin";
pub const CERT_FILE: &str = "certificate.pem";
pub const PRIVATE_KEY_FILE: &str = "private_key.pem";
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";

/// Prefix marking a value already encrypted by [`SecurityManager::secure_config_file`].
pub const ENCRYPTED_PREFIX: &str = "encrypted:";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const PBKDF2_ITERATIONS: usize = 100_000;
const RSA_BITS: u32 = 2048;

/// Substrings that flag a config file as holding plaintext secrets.
const SENSITIVE_PATTERNS: &[&str] = &["password", "secret", "key", "token", "api_key"];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CertificateStatus {
    pub valid: bool,
    pub days_remaining: Option<i32>,
    pub expiring_soon: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilePermission {
    pub permissions: String,
    pub secure: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub timestamp: DateTime<Utc>,
    pub key_present: bool,
    pub key_length: usize,
    pub certificate_exists: bool,
    pub private_key_exists: bool,
    pub public_key_exists: bool,
    pub certificate: CertificateStatus,
    pub file_permissions: BTreeMap<String, FilePermission>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigAudit {
    pub valid: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

pub struct SecurityManager {
    dir: PathBuf,
    key: Zeroizing<[u8; KEY_LEN]>,
    validity_days: u32,
    warning_days: u32,
}

impl SecurityManager {
    /// Load the key and certificate from `config.dir`, generating whatever
    /// is missing. An expired or unreadable certificate is regenerated.
    pub fn load(config: &SecurityConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)
            .with_context(|| format!("Failed to create {:?}", config.dir))?;
        set_mode(&config.dir, 0o700)?;

        let key = load_or_generate_key(&config.dir.join(KEY_FILE))?;
        let manager = Self {
            dir: config.dir.clone(),
            key,
            validity_days: config.cert_validity_days,
            warning_days: config.cert_warning_days,
        };

        if !manager.certificate_status().valid {
            manager.generate_certificate()?;
        }
        Ok(manager)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Write a fresh RSA-2048 self-signed certificate for localhost.
    pub fn generate_certificate(&self) -> Result<()> {
        info!("Generating self-signed certificate...");
        let rsa = Rsa::generate(RSA_BITS).context("Failed to generate RSA key")?;
        let pkey = PKey::from_rsa(rsa)?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("C", "US")?;
        name.append_entry_by_text("ST", "CA")?;
        name.append_entry_by_text("L", "San Francisco")?;
        name.append_entry_by_text("O", "WARP NextDNS Manager")?;
        name.append_entry_by_text("CN", "localhost")?;
        let name = name.build();

        let serial = {
            let mut bn = BigNum::new()?;
            bn.rand(159, MsbOption::MAYBE_ZERO, false)?;
            bn.to_asn1_integer()?
        };

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&pkey)?;
        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(self.validity_days)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;
        let san = SubjectAlternativeName::new()
            .dns("localhost")
            .ip("127.0.0.1")
            .build(&builder.x509v3_context(None, None))?;
        builder.append_extension(san)?;
        builder.sign(&pkey, MessageDigest::sha256())?;
        let cert = builder.build();

        write_with_mode(&self.path(CERT_FILE), &cert.to_pem()?, 0o644)?;
        write_with_mode(
            &self.path(PRIVATE_KEY_FILE),
            &pkey.private_key_to_pem_pkcs8()?,
            0o600,
        )?;
        write_with_mode(&self.path(PUBLIC_KEY_FILE), &pkey.public_key_to_pem()?, 0o644)?;
        Ok(())
    }

    /// Whether the certificate exists and is within its validity window.
    pub fn certificate_status(&self) -> CertificateStatus {
        let invalid = CertificateStatus {
            valid: false,
            days_remaining: None,
            expiring_soon: false,
        };
        let pem = match fs::read(self.path(CERT_FILE)) {
            Ok(p) => p,
            Err(_) => return invalid,
        };
        let cert = match X509::from_pem(&pem) {
            Ok(c) => c,
            Err(e) => {
                warn!("Certificate is unreadable: {}", e);
                return invalid;
            }
        };
        let now = match Asn1Time::days_from_now(0) {
            Ok(t) => t,
            Err(_) => return invalid,
        };

        let started = cert.not_before() <= &*now;
        let not_expired = cert.not_after() >= &*now;
        let days_remaining = now.diff(cert.not_after()).ok().map(|d| d.days);
        let expiring_soon = days_remaining.is_some_and(|d| d < self.warning_days as i32);
        if started && not_expired && expiring_soon {
            warn!("Certificate expires in {} days", days_remaining.unwrap_or(0));
        }
        CertificateStatus {
            valid: started && not_expired,
            days_remaining,
            expiring_soon,
        }
    }

    /// Encrypt to base64(nonce || ciphertext || tag).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key[..])
            .map_err(|_| WarpError::Security("invalid key length".to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| WarpError::Security("encryption failed".to_string()))?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| WarpError::Security(format!("invalid base64: {}", e)))?;
        if bytes.len() <= NONCE_LEN {
            return Err(WarpError::Security("ciphertext too short".to_string()).into());
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::from_exact_iter(nonce_bytes.iter().copied())
            .ok_or_else(|| WarpError::Security("invalid nonce".to_string()))?;
        let cipher = Aes256Gcm::new_from_slice(&self.key[..])
            .map_err(|_| WarpError::Security("invalid key length".to_string()))?;
        let plaintext = cipher
            .decrypt(&nonce, ciphertext)
            .map_err(|_| WarpError::Security("decryption failed (wrong key or corrupted data)".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| WarpError::Security("decrypted data is not UTF-8".to_string()).into())
    }

    /// Encrypt the named top-level string values of a JSON file in place.
    /// Values already carrying [`ENCRYPTED_PREFIX`] are left alone. Returns
    /// whether the file changed.
    pub fn secure_config_file(&self, path: &Path, sensitive_keys: &[String]) -> Result<bool> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let mut value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("{:?} is not valid JSON", path))?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| WarpError::Parse(format!("{:?}: expected a JSON object", path)))?;

        let mut modified = false;
        for key in sensitive_keys {
            if let Some(serde_json::Value::String(s)) = object.get(key) {
                if s.starts_with(ENCRYPTED_PREFIX) {
                    continue;
                }
                let encrypted = format!("{}{}", ENCRYPTED_PREFIX, self.encrypt(s)?);
                object.insert(key.clone(), serde_json::Value::String(encrypted));
                modified = true;
            }
        }

        if modified {
            let out = serde_json::to_string_pretty(&value)?;
            write_with_mode(path, out.as_bytes(), 0o600)?;
            info!("Secured configuration file {:?}", path);
        }
        Ok(modified)
    }

    pub fn report(&self) -> SecurityReport {
        let certificate = self.certificate_status();
        let mut file_permissions = BTreeMap::new();
        for name in [CERT_FILE, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE, KEY_FILE] {
            if let Some(mode) = file_mode(&self.path(name)) {
                file_permissions.insert(
                    name.to_string(),
                    FilePermission {
                        permissions: format!("{:o}", mode),
                        secure: mode == 0o600 || mode == 0o644,
                    },
                );
            }
        }

        let mut recommendations = Vec::new();
        if !certificate.valid {
            recommendations.push("SSL certificate is invalid or missing".to_string());
        } else if certificate.expiring_soon {
            recommendations.push("SSL certificate expires soon, regenerate it".to_string());
        }
        for (name, perm) in &file_permissions {
            if !perm.secure {
                recommendations.push(format!("File {} has insecure permissions", name));
            }
        }
        if recommendations.is_empty() {
            recommendations.push("Security configuration is good".to_string());
        }

        SecurityReport {
            timestamp: Utc::now(),
            key_present: true,
            key_length: self.key.len(),
            certificate_exists: self.path(CERT_FILE).exists(),
            private_key_exists: self.path(PRIVATE_KEY_FILE).exists(),
            public_key_exists: self.path(PUBLIC_KEY_FILE).exists(),
            certificate,
            file_permissions,
            recommendations,
        }
    }

    /// Delete files in the security directory older than `max_age_days`,
    /// except the key and certificate material.
    pub fn cleanup_old_files(&self, max_age_days: u64) -> Result<Vec<String>> {
        let max_age = Duration::from_secs(max_age_days.saturating_mul(86_400));
        let now = SystemTime::now();
        let mut removed = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if [KEY_FILE, CERT_FILE, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE].contains(&name.as_str()) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age > max_age {
                fs::remove_file(entry.path())?;
                removed.push(name);
            }
        }
        if !removed.is_empty() {
            info!("Removed old security files: {:?}", removed);
        }
        Ok(removed)
    }
}

/// PBKDF2-HMAC-SHA256 hash of `password`, base64 encoded. A random hex
/// salt is generated when none is given.
pub fn hash_password(password: &str, salt: Option<&str>) -> Result<(String, String)> {
    let salt = match salt {
        Some(s) => s.to_string(),
        None => {
            let mut bytes = [0u8; 16];
            OsRng.fill_bytes(&mut bytes);
            bytes.iter().map(|b| format!("{:02x}", b)).collect()
        }
    };
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    openssl::pkcs5::pbkdf2_hmac(
        password.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        MessageDigest::sha256(),
        &mut key[..],
    )?;
    Ok((BASE64.encode(&key[..]), salt))
}

/// Constant-time comparison against a hash from [`hash_password`].
pub fn verify_password(password: &str, hashed: &str, salt: &str) -> bool {
    match hash_password(password, Some(salt)) {
        Ok((computed, _)) => {
            computed.len() == hashed.len()
                && openssl::memcmp::eq(computed.as_bytes(), hashed.as_bytes())
        }
        Err(e) => {
            debug!("Password hashing failed: {:#}", e);
            false
        }
    }
}

/// URL-safe random token built from `bytes` random bytes.
pub fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Check permissions and plaintext secrets in a config file.
pub fn audit_config_file(path: &Path) -> ConfigAudit {
    let mut audit = ConfigAudit::default();
    if !path.exists() {
        audit.issues.push("Configuration file does not exist".to_string());
        return audit;
    }

    if let Some(mode) = file_mode(path) {
        if mode != 0o600 {
            audit
                .issues
                .push(format!("Configuration file has insecure permissions: {:o}", mode));
            audit.recommendations.push("Set file permissions to 600".to_string());
        }
    }

    match fs::read_to_string(path) {
        Ok(content) => {
            let lower = content.to_lowercase();
            for pattern in SENSITIVE_PATTERNS {
                if lower.contains(pattern) {
                    audit
                        .issues
                        .push(format!("Potential sensitive data found: {}", pattern));
                    audit
                        .recommendations
                        .push(format!("Encrypt or remove sensitive data: {}", pattern));
                }
            }
        }
        Err(e) => audit.issues.push(format!("Validation error: {}", e)),
    }

    audit.valid = audit.issues.is_empty();
    audit
}

fn load_or_generate_key(path: &Path) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    if path.exists() {
        let bytes = Zeroizing::new(fs::read(path).with_context(|| format!("Failed to read {:?}", path))?);
        if bytes.len() == KEY_LEN {
            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(&bytes);
            return Ok(key);
        }
        warn!("Encryption key {:?} has wrong length, regenerating", path);
    }

    info!("Generating encryption key...");
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut key[..]);
    write_with_mode(path, &key[..], 0o600)?;
    Ok(key)
}

fn write_with_mode(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("Failed to write {:?}", path))?;
    set_mode(path, mode)
}

#[cfg(unix)]
fn file_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> Option<u32> {
    None
}
