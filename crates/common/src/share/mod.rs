mod grant;
mod manager;

pub use grant::{Audience, GrantScope, GrantSpec, GrantToken, ShareGrant, TOKEN_BYTES};
pub use manager::ShareManager;
