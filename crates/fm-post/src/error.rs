use thiserror::Error;

#[derive(Debug, Error)]
pub enum PostError {
    #[error("postbox still cascading after {rounds} drain rounds")]
    RoundLimit { rounds: u32 },
}

pub type PostResult<T> = Result<T, PostError>;
