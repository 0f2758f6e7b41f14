use crate::store::*;
use crate::types::{NewTask, Status, Task, TaskId};
use std::sync::Arc;

mod json;

fn task(id: &str) -> Task {
    Task::from_request(TaskId::new(id), NewTask::new(format!("https://example.com/{id}")))
}
