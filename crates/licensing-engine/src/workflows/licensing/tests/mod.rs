mod common;
mod reconciler;
mod workflow;
