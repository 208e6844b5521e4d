#![allow(dead_code)]

pub mod mock_historian;

pub use mock_historian::{
    CapturedRequest, cooperative_historian, spawn_historian, tcp_listener,
};
