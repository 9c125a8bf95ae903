pub mod key_management;
pub mod signatures;

pub use key_management::{key_id_for, PublicKeyRecord, SigningKeyRing};
pub use signatures::{canonical_json, ChainSignature, CryptographicIntegrityManager};
