use tokio::sync::oneshot;

use crate::error::TransportError;

pub(crate) struct QueueItem {
    pub channel: String,
    pub raw: String,
    pub resolver: oneshot::Sender<Result<bool, TransportError>>,
}
