//! Client factory extensions.
//!
//! Each submodule contributes a [`crate::hooks::SessionHook`] that attaches
//! a client factory capability to the session once it is ready, making
//! preconfigured clients available to test code through
//! [`crate::session::Session::extensions`].

pub mod rest;
