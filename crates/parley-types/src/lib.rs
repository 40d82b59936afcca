//! Wire types shared by the Parley API and its clients.

pub mod api;
