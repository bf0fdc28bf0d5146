use std::io;
use thiserror::Error;

use crate::netlist::PoolError;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("buffer pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("buffer pool exhausted")]
    PoolExhausted,

    #[error("error in select: {0}")]
    Poll(#[source] io::Error),

    #[error("could not readv: {0}")]
    Read(#[source] io::Error),

    #[error("input session is not ready")]
    NotReady,

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, InputError>;
