//! Task tracking and cooperative shutdown for the actors of one process.
//!
//! Actors spawned through [`ActorSystem::spawn`] subscribe to a broadcast
//! shutdown signal; their tasks land in a `JoinSet` so teardown can await
//! them and surface the first failure.
use crate::actor::{spawn_actor_with_shutdown, Actor, Addr};
use anyhow::Result;
use tokio::{sync::broadcast, task::JoinSet};

pub struct ActorSystem {
    joinset: JoinSet<Result<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(32);
        Self {
            joinset: JoinSet::new(),
            shutdown_tx,
        }
    }

    /// Spawn an actor wired to the shutdown signal and track its task.
    ///
    /// ```
    /// # use anyhow::Result;
    /// # use async_trait::async_trait;
    /// # use webproof_actors::actor::{Actor, Context};
    /// # use webproof_actors::system::ActorSystem;
    /// # struct Sink;
    /// # #[async_trait]
    /// # impl Actor for Sink {
    /// #     type Msg = ();
    /// #     async fn handle(&mut self, _msg: (), _ctx: &mut Context<Self>) -> Result<()> { Ok(()) }
    /// # }
    /// let rt = tokio::runtime::Runtime::new().unwrap();
    /// rt.block_on(async {
    ///     let mut system = ActorSystem::new();
    ///     let sink = system.spawn(Sink, 4);
    ///     sink.send(()).await.unwrap();
    ///     system.graceful_shutdown().await.unwrap();
    ///     assert!(sink.is_closed());
    /// });
    /// ```
    pub fn spawn<A: Actor>(&mut self, actor: A, mailbox: usize) -> Addr<A> {
        let handle = spawn_actor_with_shutdown(actor, mailbox, Some(self.shutdown_tx.subscribe()));
        self.joinset.spawn(async move { handle.task.await? });
        handle.addr
    }

    /// Signal shutdown and wait for every tracked task; the first failure wins.
    pub async fn graceful_shutdown(mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        let mut first_err = None;
        while let Some(res) = self.joinset.join_next().await {
            if let Err(e) = res.map_err(anyhow::Error::from).and_then(|r| r) {
                tracing::warn!(error = %e, "system.task_failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
