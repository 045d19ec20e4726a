//! Data models for the session core.
//!
//! - `Profile`, `UserId`: the signed-in user's identifying record
//! - Wire types for the auth endpoints: `LoginRequest`, `LoginResponse`,
//!   `RefreshRequest`, `RefreshResponse`, `ProfileResponse`,
//!   `RegisterRequest`, `MessageResponse`

pub mod profile;
pub mod wire;

pub use profile::{Profile, UserId};
pub use wire::{
    LoginRequest, LoginResponse, MessageResponse, ProfileResponse, RefreshRequest,
    RefreshResponse, RegisterRequest,
};
