use thiserror::Error;

/// Session failures. Every variant except `Destroyed` and `Signaling` raised
/// by a call is fatal to the session that detected it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("cannot create peer connection: {0}")]
    PeerConnection(String),
    #[error("cannot create offer: {0}")]
    CreateOffer(String),
    #[error("cannot create answer: {0}")]
    CreateAnswer(String),
    #[error("cannot set local description: {0}")]
    SetLocalDescription(String),
    #[error("cannot set remote description: {0}")]
    SetRemoteDescription(String),
    #[error("cannot add ice candidate: {0}")]
    AddIceCandidate(String),
    #[error("cannot add transceiver: {0}")]
    AddTransceiver(String),
    #[error("ice connection failed")]
    IceConnectionFailure,
    #[error("ice connection closed")]
    IceConnectionClosed,
    #[error("connection failed")]
    ConnectionFailure,
    #[error("data channel error: {0}")]
    DataChannel(String),
    #[error("invalid signal: {0}")]
    Signaling(String),
    #[error("peer is destroyed")]
    Destroyed,
}

impl Error {
    /// Stable machine-readable code, matching the codes peers exchange in logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::PeerConnection(_) => "ERR_PC_CONSTRUCTOR",
            Error::CreateOffer(_) => "ERR_CREATE_OFFER",
            Error::CreateAnswer(_) => "ERR_CREATE_ANSWER",
            Error::SetLocalDescription(_) => "ERR_SET_LOCAL_DESCRIPTION",
            Error::SetRemoteDescription(_) => "ERR_SET_REMOTE_DESCRIPTION",
            Error::AddIceCandidate(_) => "ERR_ADD_ICE_CANDIDATE",
            Error::AddTransceiver(_) => "ERR_ADD_TRANSCEIVER",
            Error::IceConnectionFailure => "ERR_ICE_CONNECTION_FAILURE",
            Error::IceConnectionClosed => "ERR_ICE_CONNECTION_CLOSED",
            Error::ConnectionFailure => "ERR_CONNECTION_FAILURE",
            Error::DataChannel(_) => "ERR_DATA_CHANNEL",
            Error::Signaling(_) => "ERR_SIGNALING",
            Error::Destroyed => "ERR_DESTROYED",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
