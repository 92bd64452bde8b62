//! filedrop - a single-threaded, epoll-driven file sharing server.
//!
//! Serves a listing of one upload directory, streams downloads with
//! `sendfile(2)`, deletes files and accepts `multipart/form-data` uploads, all
//! from one non-blocking event loop.

pub mod config;
pub mod handlers;
pub mod http;
pub mod network;
pub mod server;
pub mod storage;
