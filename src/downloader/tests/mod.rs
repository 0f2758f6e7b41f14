use super::test_helpers::*;
use super::*;
use crate::error::TaskError;
use crate::store::MemoryPersistence;
use crate::types::{NewTask, Status, StreamKind, Task, TaskAction, TaskMap};
use std::time::Duration;


fn video(n: usize) -> NewTask {
    NewTask::new(format!("https://media.test/watch?v={}", n)).quality("720")
}
