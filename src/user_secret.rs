//! The user secret and the object that stores it, encrypted under attribute keys.
//!
//! The user secret is 32 random bytes that encrypt everything a user keeps in
//! the PHC object store. PHC stores it once per identifying attribute, each copy
//! encrypted under that attribute's key from the Authentication Server. When
//! Auths rotates a key, the next login decrypts with the old key and
//! re-encrypts with the new one.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::auths::{AttrKeyResp, SignedIdentifyingAttrs};
use crate::crypto;
use crate::error::Error;
use crate::jwt;
use crate::types::NumericDate;

/// Object-store handle of the user secret object.
pub const USER_SECRET_HANDLE: &str = "usersecret";
/// Object-store handle of its backup copy.
pub const USER_SECRET_BACKUP_HANDLE: &str = "usersecretbackup";
/// Version written by [`compute_new_user_secret_object`].
pub const USER_SECRET_VERSION: u32 = 1;

const USER_SECRET_LEN: usize = 32;

/// The user secret encrypted under one attribute key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedUserSecret {
    /// Timestamp of the attribute key used.
    pub ts: NumericDate,
    /// Base64 ciphertext.
    #[serde(rename = "encUserSecret")]
    pub enc_user_secret: String,
}

/// attribute type id -> attribute value -> encrypted user secret.
pub type UserSecretData = BTreeMap<String, BTreeMap<String, EncryptedUserSecret>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserSecretObject {
    V1 { version: u32, data: UserSecretData },
    /// Legacy flat layout without a version marker.
    V0(UserSecretData),
}

impl UserSecretObject {
    #[must_use]
    pub fn version(&self) -> u32 {
        match self {
            Self::V1 { version, .. } => *version,
            Self::V0(_) => 0,
        }
    }

    #[must_use]
    pub fn data(&self) -> &UserSecretData {
        match self {
            Self::V1 { data, .. } | Self::V0(data) => data,
        }
    }

    #[must_use]
    pub fn entry(&self, attr_id: &str, value: &str) -> Option<&EncryptedUserSecret> {
        self.data().get(attr_id)?.get(value)
    }

    /// Timestamp of the key the secret is encrypted under for this attribute, if stored.
    #[must_use]
    pub fn timestamp_for(&self, attr_id: &str, value: &str) -> Option<NumericDate> {
        self.entry(attr_id, value).map(|e| e.ts)
    }

    /// Parse the object as it is stored at PHC (plain JSON).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `bytes` is not a user secret object.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Result of [`compute_new_user_secret_object`].
#[derive(Clone)]
pub struct NewUserSecret {
    pub object: UserSecretObject,
    pub secret: Vec<u8>,
}

impl std::fmt::Debug for NewUserSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUserSecret")
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

fn key_for<'a>(
    attr_keys: &'a BTreeMap<String, AttrKeyResp>,
    handle: &str,
) -> Result<&'a AttrKeyResp, Error> {
    attr_keys
        .get(handle)
        .ok_or_else(|| Error::UserSecret(format!("no attribute key returned for {handle}")))
}

fn recover_secret(
    attr_keys: &BTreeMap<String, AttrKeyResp>,
    identifying_attrs: &SignedIdentifyingAttrs,
    existing: &UserSecretObject,
) -> Result<Vec<u8>, Error> {
    let mut reference: Option<Vec<u8>> = None;

    for (handle, attr) in identifying_attrs {
        let Some(entry) = existing.entry(&attr.id, &attr.value) else {
            continue;
        };
        let old_key = key_for(attr_keys, handle)?.old_key.as_deref().ok_or_else(|| {
            Error::UserSecret(format!(
                "expected an old key for attribute with type {} and value {}",
                attr.id, attr.value
            ))
        })?;

        let ciphertext = STANDARD
            .decode(&entry.enc_user_secret)
            .map_err(|e| Error::UserSecret(format!("invalid encrypted user secret: {e}")))?;
        let secret = crypto::decrypt(&ciphertext, old_key)?;

        match &reference {
            None => reference = Some(secret),
            Some(r) if *r != secret => {
                return Err(Error::UserSecret(
                    "the user secrets for different identifying attributes do not match".into(),
                ));
            }
            Some(_) => {}
        }
    }

    reference.ok_or_else(|| Error::UserSecret("could not recover the user secret".into()))
}

/// Recover (or create) the user secret and encrypt it under the latest key of
/// every disclosed identifying attribute.
///
/// Entries for attributes that were not disclosed are kept as they are. The
/// result is always [`USER_SECRET_VERSION`].
///
/// # Errors
///
/// Returns [`Error::UserSecret`] if a needed key is missing, the stored copies
/// disagree, or no stored copy can be recovered, and [`Error::Crypto`] if a
/// stored copy does not decrypt.
pub fn compute_new_user_secret_object(
    attr_keys: &BTreeMap<String, AttrKeyResp>,
    identifying_attrs: &SignedIdentifyingAttrs,
    existing: Option<&UserSecretObject>,
) -> Result<NewUserSecret, Error> {
    let secret = match existing {
        None => rand::rng().random::<[u8; USER_SECRET_LEN]>().to_vec(),
        Some(existing) => recover_secret(attr_keys, identifying_attrs, existing)?,
    };

    let mut data = existing.map(|e| e.data().clone()).unwrap_or_default();
    for (handle, attr) in identifying_attrs {
        let (latest_key, ts) = &key_for(attr_keys, handle)?.latest_key;
        let key = jwt::decode_base64url(latest_key)
            .map_err(|e| Error::UserSecret(format!("invalid attribute key for {handle}: {e}")))?;
        let ciphertext = crypto::encrypt(&secret, &key)?;

        data.entry(attr.id.clone()).or_default().insert(
            attr.value.clone(),
            EncryptedUserSecret {
                ts: *ts,
                enc_user_secret: STANDARD.encode(ciphertext),
            },
        );
    }

    Ok(NewUserSecret {
        object: UserSecretObject::V1 {
            version: USER_SECRET_VERSION,
            data,
        },
        secret,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::*;
    use crate::auths::SignedAttr;

    pub(crate) fn random_key() -> String {
        URL_SAFE_NO_PAD.encode(rand::rng().random::<[u8; 32]>())
    }

    pub(crate) fn identifying(attrs: &[(&str, &str, &str)]) -> SignedIdentifyingAttrs {
        attrs
            .iter()
            .map(|(handle, id, value)| {
                (
                    handle.to_string(),
                    SignedAttr {
                        signed_attr: format!("jwt-{handle}"),
                        id: id.to_string(),
                        value: value.to_string(),
                    },
                )
            })
            .collect()
    }

    const TS0: u64 = 1_600_000_000;
    const TS1: u64 = 1_700_000_000;
    const TS2: u64 = 1_800_000_000;

    fn key_resp(latest: &str, ts: u64, old: Option<&str>) -> AttrKeyResp {
        AttrKeyResp {
            latest_key: (latest.to_string(), NumericDate(ts)),
            old_key: old.map(str::to_string),
        }
    }

    fn decrypt_entry(object: &UserSecretObject, id: &str, value: &str, key: &str) -> Vec<u8> {
        let entry = object.entry(id, value).unwrap();
        crypto::decrypt(&STANDARD.decode(&entry.enc_user_secret).unwrap(), key).unwrap()
    }

    #[test]
    fn first_login_generates_a_secret() {
        let key = random_key();
        let attrs = identifying(&[("email", "email-id", "alice@example.com")]);
        let keys = BTreeMap::from([("email".to_string(), key_resp(&key, TS1, None))]);

        let new = compute_new_user_secret_object(&keys, &attrs, None).unwrap();

        assert_eq!(new.secret.len(), 32);
        assert_eq!(new.object.version(), 1);
        assert_eq!(
            new.object.timestamp_for("email-id", "alice@example.com"),
            Some(NumericDate(TS1))
        );
        assert_eq!(decrypt_entry(&new.object, "email-id", "alice@example.com", &key), new.secret);
    }

    #[test]
    fn key_rotation_keeps_the_secret() {
        let (old, latest) = (random_key(), random_key());
        let attrs = identifying(&[("email", "email-id", "alice@example.com")]);
        let first = compute_new_user_secret_object(
            &BTreeMap::from([("email".to_string(), key_resp(&old, TS1, None))]),
            &attrs,
            None,
        )
        .unwrap();

        let keys = BTreeMap::from([("email".to_string(), key_resp(&latest, TS2, Some(&old)))]);
        let second = compute_new_user_secret_object(&keys, &attrs, Some(&first.object)).unwrap();

        assert_eq!(second.secret, first.secret);
        assert_eq!(
            second.object.timestamp_for("email-id", "alice@example.com"),
            Some(NumericDate(TS2))
        );
        assert_eq!(
            decrypt_entry(&second.object, "email-id", "alice@example.com", &latest),
            first.secret
        );
    }

    #[test]
    fn version_0_objects_migrate() {
        let secret: [u8; 32] = rand::rng().random();
        let legacy_key = "legacyAttrKey";
        let ciphertext = crypto::encrypt(&secret, legacy_key.as_bytes()).unwrap();
        let legacy = UserSecretObject::V0(BTreeMap::from([(
            "email-id".to_string(),
            BTreeMap::from([(
                "alice@example.com".to_string(),
                EncryptedUserSecret {
                    ts: NumericDate(TS0),
                    enc_user_secret: STANDARD.encode(ciphertext),
                },
            )]),
        )]));
        let parsed = UserSecretObject::from_bytes(&legacy.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.version(), 0);

        let latest = random_key();
        let attrs = identifying(&[("email", "email-id", "alice@example.com")]);
        let keys =
            BTreeMap::from([("email".to_string(), key_resp(&latest, TS1, Some(legacy_key)))]);

        let new = compute_new_user_secret_object(&keys, &attrs, Some(&parsed)).unwrap();

        assert_eq!(new.secret, secret);
        assert!(matches!(new.object, UserSecretObject::V1 { version: 1, .. }));
    }

    #[test]
    fn missing_old_key_is_an_error() {
        let key = random_key();
        let attrs = identifying(&[("email", "email-id", "alice@example.com")]);
        let first = compute_new_user_secret_object(
            &BTreeMap::from([("email".to_string(), key_resp(&key, TS1, None))]),
            &attrs,
            None,
        )
        .unwrap();

        let keys = BTreeMap::from([("email".to_string(), key_resp(&random_key(), TS2, None))]);
        let err = compute_new_user_secret_object(&keys, &attrs, Some(&first.object)).unwrap_err();
        assert!(matches!(err, Error::UserSecret(msg) if msg.contains("old key")));
    }

    #[test]
    fn disagreeing_copies_are_an_error() {
        let (k1, k2) = (random_key(), random_key());
        let email = compute_new_user_secret_object(
            &BTreeMap::from([("email".to_string(), key_resp(&k1, TS1, None))]),
            &identifying(&[("email", "email-id", "alice@example.com")]),
            None,
        )
        .unwrap();
        let phone = compute_new_user_secret_object(
            &BTreeMap::from([("phone".to_string(), key_resp(&k2, TS1, None))]),
            &identifying(&[("phone", "phone-id", "+31600000000")]),
            None,
        )
        .unwrap();

        let mut data = email.object.data().clone();
        data.extend(phone.object.data().clone());
        let combined = UserSecretObject::V1 { version: 1, data };

        let attrs = identifying(&[
            ("email", "email-id", "alice@example.com"),
            ("phone", "phone-id", "+31600000000"),
        ]);
        let keys = BTreeMap::from([
            ("email".to_string(), key_resp(&random_key(), TS2, Some(&k1))),
            ("phone".to_string(), key_resp(&random_key(), TS2, Some(&k2))),
        ]);
        let err = compute_new_user_secret_object(&keys, &attrs, Some(&combined)).unwrap_err();
        assert!(matches!(err, Error::UserSecret(msg) if msg.contains("do not match")));
    }

    #[test]
    fn unrecoverable_when_no_disclosed_attr_has_a_copy() {
        let existing = UserSecretObject::V1 {
            version: 1,
            data: UserSecretData::new(),
        };
        let attrs = identifying(&[("email", "email-id", "alice@example.com")]);
        let keys = BTreeMap::from([("email".to_string(), key_resp(&random_key(), TS1, None))]);
        let err = compute_new_user_secret_object(&keys, &attrs, Some(&existing)).unwrap_err();
        assert!(matches!(err, Error::UserSecret(msg) if msg.contains("could not recover")));
    }

    #[test]
    fn other_entries_are_kept() {
        let key = random_key();
        let first = compute_new_user_secret_object(
            &BTreeMap::from([("email".to_string(), key_resp(&key, TS1, None))]),
            &identifying(&[("email", "email-id", "alice@example.com")]),
            None,
        )
        .unwrap();

        // Log in with both attributes; only the email copy exists so far.
        let attrs = identifying(&[
            ("email", "email-id", "alice@example.com"),
            ("phone", "phone-id", "+31600000000"),
        ]);
        let phone_key = random_key();
        let keys = BTreeMap::from([
            ("email".to_string(), key_resp(&key, TS1, Some(&key))),
            ("phone".to_string(), key_resp(&phone_key, TS1, None)),
        ]);
        let second = compute_new_user_secret_object(&keys, &attrs, Some(&first.object)).unwrap();

        assert_eq!(second.secret, first.secret);
        assert_eq!(
            decrypt_entry(&second.object, "phone-id", "+31600000000", &phone_key),
            first.secret
        );
    }

    #[test]
    fn stored_version_1_object() {
        let json = r#"{"version":1,"data":{"email-id":{"a@b.c":{"ts":1718000000,"encUserSecret":"AAAA"}}}}"#;
        let object = UserSecretObject::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(object.version(), 1);
        assert_eq!(
            object.timestamp_for("email-id", "a@b.c"),
            Some(NumericDate(1_718_000_000))
        );
        assert_eq!(String::from_utf8(object.to_bytes().unwrap()).unwrap(), json);
    }

    #[test]
    fn stored_version_0_object() {
        // Flat layout written before objects carried a version.
        let json = br#"{
            "email-id": {"alice@example.com": {"ts": 1650000000, "encUserSecret": "AAAA"}},
            "phone-id": {"+31600000000": {"ts": 1650000001, "encUserSecret": "BBBB"}}
        }"#;
        let object = UserSecretObject::from_bytes(json).unwrap();
        assert_eq!(object.version(), 0);
        assert_eq!(
            object.timestamp_for("phone-id", "+31600000000"),
            Some(NumericDate(1_650_000_001))
        );
        assert_eq!(
            object.entry("email-id", "alice@example.com").unwrap().enc_user_secret,
            "AAAA"
        );
    }

    #[test]
    fn string_timestamps_do_not_parse() {
        let json = br#"{"version":1,"data":{"email-id":{"a@b.c":{"ts":"1718000000","encUserSecret":"AAAA"}}}}"#;
        assert!(UserSecretObject::from_bytes(json).is_err());
    }
}
