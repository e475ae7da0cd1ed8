pub enum TaskStatus {
    TaskPercentage(String, usize, usize),
}

/// Progress update handed to the caller's status callback. `None` means the
/// task has completed.
#[derive(Default)]
pub struct TaskStatusContainer {
    pub status: Option<TaskStatus>,
}

pub fn set_task_status<F: FnMut(TaskStatusContainer)>(sender: &mut F, name: &str, len: usize, cnt: usize) {
    sender(TaskStatusContainer {
        status: Some(TaskStatus::TaskPercentage(name.to_owned(), len, cnt)),
    });
}

pub fn set_task_completed<F: FnMut(TaskStatusContainer)>(sender: &mut F) {
    sender(TaskStatusContainer::default());
}
