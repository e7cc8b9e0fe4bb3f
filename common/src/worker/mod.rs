// Worker-side job processing: dispatches queue messages to scrape/crawl handling.

pub mod dispatch;

pub use dispatch::{JobDispatcher, WorkerDeps};
