//! File synchronisation between a container and the host.

use std::sync::Arc;

use super::container::{ContainerRef, Engine};
use super::{quote, run_checked};
use crate::exec::ExecOptions;
use crate::task::{ErrorCode, Slot, Step, StepOutcome, TaskContext, TaskError};

/// Upper bound on the quoted size of one write command's payload. Single
/// quotes are weighted for the two rounds of shell quoting they go through,
/// keeping every command well under the per-argument limit of `execve`.
const WRITE_CHUNK_BUDGET: usize = 64 * 1024;
const QUOTE_WEIGHT: usize = 16;

/// Rewrites a single line of a synchronised file.
pub type LineMutator = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Copies a file out of a container, rewrites it line by line through a
/// host temp file, and copies it back to its destination path.
pub struct SyncFile {
    engine: Engine,
    container: ContainerRef,
    source_path: String,
    dest_path: String,
    temp_path: String,
    mutator: LineMutator,
}

impl SyncFile {
    /// Creates the step. `temp_path` should be unique per task and removed
    /// by a post step.
    pub fn new(
        engine: Engine,
        container: impl Into<ContainerRef>,
        source_path: impl Into<String>,
        dest_path: impl Into<String>,
        temp_path: impl Into<String>,
        mutator: LineMutator,
    ) -> Self {
        Self {
            engine,
            container: container.into(),
            source_path: source_path.into(),
            dest_path: dest_path.into(),
            temp_path: temp_path.into(),
            mutator,
        }
    }

    fn sync(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        let id = self.container.resolve(self.name(), ctx)?;
        let options = &self.engine.options;

        let copy_out = self.engine.command(&[
            "cp",
            &format!("{id}:{}", self.source_path),
            &self.temp_path,
        ]);
        run_checked(ctx, &copy_out, options, ErrorCode::COPY_FROM_CONTAINER)?;

        let read = format!("cat {}", quote(&self.temp_path));
        let original = run_checked(ctx, &read, options, ErrorCode::READ_FILE)?;
        let rewritten = mutate_lines(&original, self.mutator.as_ref());

        let temp = quote(&self.temp_path);
        let mut chunks = write_chunks(&rewritten);
        if chunks.is_empty() {
            chunks.push("");
        }
        for (position, chunk) in chunks.iter().enumerate() {
            let redirect = if position == 0 { ">" } else { ">>" };
            let write = format!("printf '%s' {} {redirect} {temp}", quote(chunk));
            run_checked(ctx, &write, options, ErrorCode::WRITE_FILE)?;
        }

        let copy_in = self.engine.command(&[
            "cp",
            &self.temp_path,
            &format!("{id}:{}", self.dest_path),
        ]);
        run_checked(ctx, &copy_in, options, ErrorCode::COPY_INTO_CONTAINER)?;
        Ok(())
    }
}

impl Step for SyncFile {
    fn name(&self) -> &str {
        "sync file"
    }

    fn reads(&self) -> Vec<Slot> {
        self.container.reads()
    }

    fn execute(&self, ctx: &mut TaskContext<'_>) -> StepOutcome {
        self.sync(ctx).into()
    }
}

/// Applies `mutator` to every line. Each line keeps its own ending, so
/// `\r\n` files and a missing final newline survive unchanged.
pub(super) fn mutate_lines(text: &str, mutator: &(dyn Fn(&str) -> String + Send + Sync)) -> String {
    text.split_inclusive('\n')
        .map(|line| {
            let (body, ending) = line
                .strip_suffix("\r\n")
                .map(|trimmed| (trimmed, "\r\n"))
                .or_else(|| line.strip_suffix('\n').map(|trimmed| (trimmed, "\n")))
                .unwrap_or((line, ""));
            let mut rewritten = mutator(body);
            rewritten.push_str(ending);
            rewritten
        })
        .collect()
}

/// Splits `text` on character boundaries into pieces small enough to pass
/// as a single quoted shell argument.
pub(super) fn write_chunks(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut cost = 0;
        let end = rest
            .char_indices()
            .find_map(|(offset, ch)| {
                cost += if ch == '\'' { QUOTE_WEIGHT } else { ch.len_utf8() };
                (cost > WRITE_CHUNK_BUDGET && offset > 0).then_some(offset)
            })
            .unwrap_or(rest.len());
        let Some((head, tail)) = rest.split_at_checked(end) else {
            break;
        };
        chunks.push(head);
        rest = tail;
    }
    chunks
}

/// Removes a file on the target host; a missing file is not an error.
pub struct RemoveFile {
    path: String,
    options: ExecOptions,
}

impl RemoveFile {
    /// Creates the step.
    pub fn new(path: impl Into<String>, options: ExecOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }
}

impl Step for RemoveFile {
    fn name(&self) -> &str {
        "remove file"
    }

    fn execute(&self, ctx: &mut TaskContext<'_>) -> StepOutcome {
        let command = format!("rm -f {}", quote(&self.path));
        run_checked(ctx, &command, &self.options, ErrorCode::REMOVE_FILE)
            .map(|_| ())
            .into()
    }
}
