//! Key derivation: Argon2 password hashing, Concat KDF and the JOSE
//! ECDH-ES / ECDH-1PU key agreement constructions.

mod argon2;
pub use self::argon2::*;

mod concat;
pub use concat::*;

mod ecdh_es;
pub use ecdh_es::*;

mod ecdh_1pu;
pub use ecdh_1pu::*;
