//! Server lifecycle: listening, CORS, graceful shutdown.
//!
//! The important guarantees:
//! - **Idempotent start/stop:** starting twice stops the previous instance;
//!   stopping twice is a no-op.
//! - **Graceful shutdown:** in-flight requests may finish (up to a timeout).
//! - **Ephemeral ports:** starting with port 0 records the assigned port so
//!   tests can build URLs.

use super::{cors, routes};
use crate::server::state::SharedState;
use anyhow::Result;
use panotiles_derive::context;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub struct RenderServer {
	state: SharedState,
	ip: String,
	port: u16,
	/// One-shot channel to signal graceful shutdown to the serving task.
	exit_signal: Option<oneshot::Sender<()>>,
	/// Join handle of the serving task; awaited in `stop()`.
	join: Option<tokio::task::JoinHandle<()>>,
}

impl RenderServer {
	pub fn new(state: SharedState) -> Self {
		let ip = state.config.ip.clone();
		let port = state.config.port;
		Self {
			state,
			ip,
			port,
			exit_signal: None,
			join: None,
		}
	}

	/// Start listening and serving requests.
	#[context("starting render server")]
	pub async fn start(&mut self) -> Result<()> {
		// If already running, stop first to avoid port conflicts and leaked tasks.
		if self.exit_signal.is_some() || self.join.is_some() {
			self.stop().await;
		}

		let router = routes::build_router(self.state.clone()).layer(cors::build_cors_layer(&self.state.config.cors_origins));

		let addr = format!("{}:{}", self.ip, self.port);
		log::info!("server binding on {addr}");

		let listener = TcpListener::bind(&addr).await?;
		// If we asked for an ephemeral port (0), record the assigned one for URLs.
		if self.port == 0 {
			self.port = listener.local_addr()?.port();
		}
		let (tx, rx) = oneshot::channel::<()>();

		let handle = tokio::spawn(async move {
			if let Err(err) = axum::serve(listener, router.into_make_service())
				.with_graceful_shutdown(async {
					rx.await.ok();
				})
				.await
			{
				// The task boundary is a good place to log; we can't bubble this up after spawn.
				log::error!("server task exited with error: {err}");
			}
		});

		self.exit_signal = Some(tx);
		self.join = Some(handle);

		Ok(())
	}

	/// Trigger graceful shutdown and wait for the server task (with timeout).
	pub async fn stop(&mut self) {
		if self.exit_signal.is_none() && self.join.is_none() {
			return;
		}

		log::info!("stopping server");

		if let Some(tx) = self.exit_signal.take() {
			let _ = tx.send(());
		}

		if let Some(handle) = self.join.take() {
			match tokio::time::timeout(std::time::Duration::from_secs(10), handle).await {
				Ok(join_result) => {
					if let Err(join_err) = join_result {
						log::warn!("server task join error: {join_err}");
					}
				}
				Err(_) => {
					log::warn!("server task did not shutdown within timeout; continuing");
				}
			}
		}
	}

	/// The port the server is listening on (the assigned one when started
	/// with port 0).
	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn state(&self) -> &SharedState {
		&self.state
	}
}
