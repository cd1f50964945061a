pub mod hmac;

pub use hmac::{OkxSigner, WsLoginArgs};
