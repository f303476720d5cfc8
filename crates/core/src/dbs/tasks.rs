use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinError;

/// A spawned background task, resolving once the task has exited
pub type Task = Pin<Box<dyn Future<Output = Result<(), JoinError>> + Send + 'static>>;

/// The background tasks started by a node.
#[derive(Default)]
pub struct Tasks(Vec<Task>);

impl Tasks {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, task: Task) {
		self.0.push(task);
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Wait for every task to exit
	pub async fn resolve(self) {
		for task in self.0.into_iter() {
			if let Err(e) = task.await {
				error!(target: "graphwrite::dbs", "Background task failed: {e}");
			}
		}
	}
}

impl Extend<Task> for Tasks {
	fn extend<I: IntoIterator<Item = Task>>(&mut self, iter: I) {
		self.0.extend(iter)
	}
}
