#![allow(dead_code)]

pub mod keys {
    use crate::PrivateKeyPemRef;

    pub const RSA_PKCS1: &str = include_str!("../data/app-key.pem");
    pub const RSA_PKCS8: &str = include_str!("../data/app-key-pkcs8.pem");
    pub const EC_P256: &str = include_str!("../data/ec-key.pem");

    pub fn rsa_pkcs1() -> &'static PrivateKeyPemRef {
        PrivateKeyPemRef::from_str(RSA_PKCS1)
    }

    pub fn rsa_pkcs8() -> &'static PrivateKeyPemRef {
        PrivateKeyPemRef::from_str(RSA_PKCS8)
    }

    pub fn ec_p256() -> &'static PrivateKeyPemRef {
        PrivateKeyPemRef::from_str(EC_P256)
    }
}
