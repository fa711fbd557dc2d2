use super::{Queue, Task, TaskMeta};
use crate::error::QueueError;
use crate::utils::fs::{is_hidden, temp_path_for, write_atomic};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const TASK_EXTENSION: &str = "md";
/// Destination names tried before a move gives up on a racing writer.
const MOVE_ATTEMPTS: u32 = 8;

/// Stable task id: the file stem (`EMAIL_18c2f...` for `EMAIL_18c2f....md`).
pub fn task_id(name: &str) -> &str {
    name.strip_suffix(".md").unwrap_or(name)
}

/// Whether a visible directory entry is a task file.
pub fn is_task_file(name: &str) -> bool {
    !name.starts_with('.')
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(TASK_EXTENSION))
}

fn io_error(path: &Path, source: std::io::Error) -> QueueError {
    QueueError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// The vault's fixed queue directories.
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create every queue directory that does not exist yet.
    pub fn ensure_layout(&self) -> Result<(), QueueError> {
        for queue in Queue::all() {
            let dir = self.queue_dir(queue);
            fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;
        }
        Ok(())
    }

    pub fn queue_dir(&self, queue: Queue) -> PathBuf {
        self.root.join(queue.dir_name())
    }

    pub fn path(&self, queue: Queue, name: &str) -> PathBuf {
        self.queue_dir(queue).join(name)
    }

    /// Visible task files in `queue`, sorted by name. Dot-files are in-flight
    /// temporaries and never listed.
    pub fn list(&self, queue: Queue) -> Result<Vec<String>, QueueError> {
        let dir = self.queue_dir(queue);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(io_error(&dir, error)),
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
            .map(|entry| entry.path())
            .filter(|path| !is_hidden(path))
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(TASK_EXTENSION))
            })
            .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn contains(&self, queue: Queue, name: &str) -> bool {
        self.path(queue, name).is_file()
    }

    /// The queue currently holding `name`, if any.
    pub fn locate(&self, name: &str) -> Option<Queue> {
        Queue::all().find(|queue| self.contains(*queue, name))
    }

    pub fn read_raw(&self, queue: Queue, name: &str) -> Result<Vec<u8>, QueueError> {
        let path = self.path(queue, name);
        fs::read(&path).map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                QueueError::AlreadyMoved {
                    queue: queue.to_string(),
                    name: name.to_string(),
                }
            } else {
                io_error(&path, error)
            }
        })
    }

    pub fn read(&self, queue: Queue, name: &str) -> Result<Task, QueueError> {
        let raw = self.read_raw(queue, name)?;
        let text = String::from_utf8_lossy(&raw);
        Task::parse(&text).map_err(|message| QueueError::Malformed {
            queue: queue.to_string(),
            name: name.to_string(),
            message,
        })
    }

    /// SHA-256 of the file's current bytes, hex encoded.
    pub fn content_hash(&self, queue: Queue, name: &str) -> Result<String, QueueError> {
        let raw = self.read_raw(queue, name)?;
        Ok(hex::encode(Sha256::digest(&raw)))
    }

    /// Write a new task. The file appears in `queue` fully written or not at
    /// all; an existing file of the same name is never replaced.
    pub fn create(&self, queue: Queue, name: &str, task: &Task) -> Result<PathBuf, QueueError> {
        let dir = self.queue_dir(queue);
        fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;

        let path = dir.join(name);
        let rendered = task.render().map_err(|error| QueueError::Malformed {
            queue: queue.to_string(),
            name: name.to_string(),
            message: error.to_string(),
        })?;

        let temp = temp_path_for(&path);
        fs::write(&temp, rendered).map_err(|source| io_error(&temp, source))?;

        // hard_link refuses to replace an existing target, unlike rename.
        let linked = fs::hard_link(&temp, &path);
        let _ = fs::remove_file(&temp);
        match linked {
            Ok(()) => Ok(path),
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                Err(QueueError::AlreadyExists {
                    queue: queue.to_string(),
                    name: name.to_string(),
                })
            }
            Err(error) => Err(io_error(&path, error)),
        }
    }

    /// Move `name` from one queue to another. Returns the file name in the
    /// destination, which gains a numeric suffix when the destination already
    /// holds a file of that name. An existing destination file is never
    /// replaced, even one that appears while the move is in progress.
    pub fn move_task(&self, from: Queue, to: Queue, name: &str) -> Result<String, QueueError> {
        let source = self.path(from, name);
        let dest_dir = self.queue_dir(to);
        fs::create_dir_all(&dest_dir).map_err(|error| io_error(&dest_dir, error))?;
        let already_moved = || QueueError::AlreadyMoved {
            queue: from.to_string(),
            name: name.to_string(),
        };

        let mut attempts = 0;
        let (dest_name, dest) = loop {
            let dest_name = self.free_name(to, name);
            let dest = dest_dir.join(&dest_name);
            match fs::hard_link(&source, &dest) {
                Ok(()) => break (dest_name, dest),
                Err(error) if error.kind() == ErrorKind::NotFound => return Err(already_moved()),
                Err(error) if error.kind() == ErrorKind::AlreadyExists && attempts < MOVE_ATTEMPTS => {
                    attempts += 1;
                }
                Err(error) => return Err(io_error(&dest, error)),
            }
        };

        match fs::remove_file(&source) {
            Ok(()) => {
                tracing::debug!(task = name, from = %from, to = %to, "task moved");
                Ok(dest_name)
            }
            // Another actor moved the same task first; theirs is the copy that counts.
            Err(error) if error.kind() == ErrorKind::NotFound => {
                let _ = fs::remove_file(&dest);
                Err(already_moved())
            }
            Err(error) => {
                let _ = fs::remove_file(&dest);
                Err(io_error(&source, error))
            }
        }
    }

    fn free_name(&self, queue: Queue, name: &str) -> String {
        if !self.contains(queue, name) {
            return name.to_string();
        }
        let stem = task_id(name);
        (1..)
            .map(|n| format!("{stem}-{n}.{TASK_EXTENSION}"))
            .find(|candidate| !self.contains(queue, candidate))
            .unwrap_or_else(|| format!("{stem}-{}.{TASK_EXTENSION}", uuid::Uuid::new_v4().simple()))
    }

    /// Rewrite a task's metadata in place with a whole-file atomic replace.
    pub fn annotate(
        &self,
        queue: Queue,
        name: &str,
        update: impl FnOnce(&mut TaskMeta),
    ) -> Result<(), QueueError> {
        let mut task = self.read(queue, name)?;
        update(&mut task.meta);
        let path = self.path(queue, name);
        let rendered = task.render().map_err(|error| QueueError::Malformed {
            queue: queue.to_string(),
            name: name.to_string(),
            message: error.to_string(),
        })?;
        write_atomic(&path, rendered.as_bytes()).map_err(|error| QueueError::Io {
            path: path.display().to_string(),
            source: std::io::Error::other(format!("{error:#}")),
        })
    }

    /// Move, then annotate inside the destination. The move is the state
    /// change; an annotation failure afterwards is logged, not returned, and
    /// an unparsable file is moved without annotation.
    pub fn transition(
        &self,
        from: Queue,
        to: Queue,
        name: &str,
        update: impl FnOnce(&mut TaskMeta),
    ) -> Result<String, QueueError> {
        let moved = self.move_task(from, to, name)?;
        let annotated = self.annotate(to, &moved, |meta| {
            meta.status = Some(to.status_label().to_string());
            update(meta);
        });
        if let Err(error) = annotated {
            tracing::warn!(task = %moved, queue = %to, %error, "moved task could not be annotated");
        }
        Ok(moved)
    }
}
