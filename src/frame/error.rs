use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame size {frame_size} must exceed the {header_size}-byte header")]
    FrameTooSmall {
        frame_size: usize,
        header_size: usize,
    },
}

pub type FrameResult<T> = Result<T, FrameError>;
