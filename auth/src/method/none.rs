//! The `none` method (§4.4): carries no credentials, sent once up front purely to
//! learn which methods the server actually accepts.

use crate::method::{body, AuthContext, AuthMethod};

#[derive(Debug, Default)]
pub struct None_;

impl AuthMethod for None_ {
    fn name(&self) -> &'static str {
        "none"
    }

    fn request_body(&mut self, _ctx: &AuthContext) -> Vec<u8> {
        body(|_| {})
    }
}
