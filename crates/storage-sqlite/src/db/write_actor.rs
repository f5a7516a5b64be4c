//! Single-writer actor for the SQLite database.
//!
//! SQLite allows one writer at a time; funneling every write through one
//! dedicated connection serializes them without lock contention, and
//! wrapping each job in an immediate transaction is what makes the catalog
//! replace atomic for concurrent readers on the pool.

use std::any::Any;

use diesel::{Connection, SqliteConnection};
use log::error;
use tokio::sync::{mpsc, oneshot};

use super::DbPool;
use crate::errors::StorageError;
use tradedesk_core::errors::Result;

/// A database job: runs on the writer's connection, inside a transaction.
type Job<T> = Box<dyn FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static>;

/// Queue depth before senders start waiting.
const WRITE_QUEUE_CAPACITY: usize = 256;

type BoxedResult = Box<dyn Any + Send + 'static>;

/// Handle for submitting jobs to the writer actor.
#[derive(Clone)]
pub struct WriteHandle {
    #[allow(clippy::type_complexity)]
    tx: mpsc::Sender<(Job<BoxedResult>, oneshot::Sender<Result<BoxedResult>>)>,
}

impl WriteHandle {
    /// Executes `job` on the writer's connection, inside an immediate
    /// transaction, and returns its result.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static + Any,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        // The return value is boxed for type erasure across the channel and
        // downcast back on this side.
        self.tx
            .send((
                Box::new(move |conn| job(conn).map(|value| Box::new(value) as BoxedResult)),
                reply_tx,
            ))
            .await
            .expect("database writer actor is gone");

        reply_rx
            .await
            .expect("database writer actor dropped the reply")
            .map(|boxed| {
                *boxed
                    .downcast::<T>()
                    .expect("writer actor result had an unexpected type")
            })
    }
}

/// Spawns the writer actor. It owns one pooled connection for its lifetime
/// and processes jobs serially until every [`WriteHandle`] is dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::channel::<(Job<BoxedResult>, oneshot::Sender<Result<BoxedResult>>)>(
        WRITE_QUEUE_CAPACITY,
    );

    tokio::spawn(async move {
        let mut conn = match pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                error!("Writer actor could not acquire a connection: {}", e);
                return;
            }
        };

        while let Some((job, reply_tx)) = rx.recv().await {
            let result: Result<BoxedResult> = conn
                .immediate_transaction::<_, StorageError, _>(|c| job(c).map_err(StorageError::from))
                .map_err(Into::into);

            // The receiver may have given up waiting; that's fine.
            let _ = reply_tx.send(result);
        }
    });

    WriteHandle { tx }
}
