use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the public client API.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// An argument failed validation before any network activity.
    #[error("bad argument")]
    BadArg,

    /// The library is not initialized or no handle slot is free.
    #[error("client creation failed")]
    CreateFail,

    /// No MQTT session is established.
    #[error("client is not connected")]
    NotConnected,

    #[error("connect failed")]
    ConnectFail,

    #[error("publish failed")]
    PublishFail,

    #[error("subscribe failed")]
    SubscribeFail,

    #[error("unsubscribe failed")]
    UnsubscribeFail,

    /// Library teardown refused while clients still exist.
    #[error("deinit failed")]
    DeinitFail,

    /// The broker answered with something the session cannot reconcile.
    #[error("protocol error")]
    Protocol,
}
