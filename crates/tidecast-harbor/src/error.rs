use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarborError {
    /// No decoder was negotiated for this input.
    #[error("no decoder is set for this input")]
    NoDecoder,

    /// The requested codec has no registered stream decoder.
    #[error("unknown codec `{codec}`")]
    UnknownCodec { codec: String },

    /// `put` was called after the client disconnected.
    #[error("relaying was stopped")]
    RelayingStopped,

    /// The peer closed the stream. A normal end of feeding.
    #[error("end of stream")]
    EndOfFile,

    /// A second client tried to take a busy mountpoint.
    #[error("a source client is already connected")]
    AlreadyConnected,

    /// The client's credentials were rejected.
    #[error("authentication failed")]
    Auth,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
