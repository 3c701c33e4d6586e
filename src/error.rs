use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not set up the prefix")]
    Setup,
    #[display("{_0} failed")]
    Command(#[error(not(source))] &'static str),
    #[display("could not write output")]
    Output,
}
