use crate::command::server;
use crate::{cache, configuration, signing, source, store};
use std::{fmt, io};

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    Configuration(configuration::Error),
    Initialization(String),
    Source(source::Error),
    Signing(signing::Error),
    Server(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IO(err) => write!(f, "IO error: {err}"),
            Error::Configuration(err) => {
                write!(f, "Configuration error:")?;
                write!(f, "{err}")
            }
            Error::Initialization(err) => write!(f, "Initialization error: {err}"),
            Error::Source(err) => write!(f, "Identity source error: {err}"),
            Error::Signing(err) => write!(f, "{err}"),
            Error::Server(err) => write!(f, "Server error: {err}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IO(err)
    }
}

impl From<configuration::Error> for Error {
    fn from(err: configuration::Error) -> Self {
        Error::Configuration(err)
    }
}

impl From<source::Error> for Error {
    fn from(err: source::Error) -> Self {
        Error::Source(err)
    }
}

impl From<signing::Error> for Error {
    fn from(err: signing::Error) -> Self {
        Error::Signing(err)
    }
}

impl From<cache::Error> for Error {
    fn from(err: cache::Error) -> Self {
        Error::Initialization(format!("Failed to initialize cache: {err}"))
    }
}

impl From<server::Error> for Error {
    fn from(err: server::Error) -> Self {
        Error::Server(err.to_string())
    }
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Self {
        Error::Initialization(err.to_string())
    }
}
