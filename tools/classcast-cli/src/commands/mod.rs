pub mod check;
pub mod layout;
pub mod record;
pub mod simulate;

use classcast_media_model::StreamStatus;
use classcast_session::StreamController;
use tokio::task::JoinHandle;

/// Print every status transition until aborted.
pub fn print_status(controller: &StreamController) -> JoinHandle<()> {
    let mut status = controller.subscribe_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current: StreamStatus = status.borrow_and_update().clone();
            println!("[status] {current}");
        }
    })
}
