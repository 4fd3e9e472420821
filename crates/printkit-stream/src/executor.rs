//! Job stream executor
//!
//! Reads a job file a chunk at a time and dispatches it line by line.
//! One dispatch loop runs at a time as a Tokio task; pause and cancel are
//! cooperative flags the loop checks before each line, so a command is
//! never interrupted part way through.
//!
//! A filament runout seen after the first line pauses the job and saves
//! the locator context; the next resume backs up to the located line.
//!
//! Registered commands:
//! - `SDCARD_PRINT_FILE FILENAME=<path>`
//! - `SDCARD_RESET_FILE`
//! - `RESUME_JOB` / `PAUSE_JOB` / `JOB_STATUS`
//! - `SET_RESUME_OFFSET OFFSET=<bytes>`

use crate::config::StreamConfig;
use crate::reader::{self, ChunkReader, SharedFile};
use crate::rewind;
use crate::splitter::LineSplitter;
use crate::state::{JobFile, JobPhase, JobState, JobStatus};
use parking_lot::Mutex;
use printkit_core::{
    register_reply_handler, run_script, CommandDispatcher, CommandError, CommandLine,
    CommandReply, EventBus, JobError, JobEvent, PrintStats, ResumeTarget, RunoutSensor,
};
use printkit_exclusion::ExcludeObject;
use printkit_locator::ResumeLocator;
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Locator context key for a runout detected while streaming
pub const RUNOUT_CONTEXT: &str = "runout";

/// How a dispatch loop activation ended
enum StreamExit {
    Stopped,
    Finished { path: String },
    Failed(String),
}

struct Inner {
    config: StreamConfig,
    reader: ChunkReader,
    dispatcher: Arc<dyn CommandDispatcher>,
    stats: Arc<dyn PrintStats>,
    events: Arc<EventBus>,
    exclusion: Option<Arc<ExcludeObject>>,
    locator: Option<Arc<ResumeLocator>>,
    runout: Option<Arc<dyn RunoutSensor>>,
    state: Mutex<JobState>,
    running: watch::Sender<bool>,
}

/// Streams a job file into the command dispatcher
pub struct StreamExecutor {
    inner: Arc<Inner>,
}

impl StreamExecutor {
    /// Create an executor with no job loaded
    pub fn new(
        config: StreamConfig,
        dispatcher: Arc<dyn CommandDispatcher>,
        stats: Arc<dyn PrintStats>,
        events: Arc<EventBus>,
    ) -> Self {
        let reader = ChunkReader::new(
            config.chunk_size,
            Duration::from_millis(config.read_timeout_ms),
            Duration::from_millis(config.read_retry_ms),
        );
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                reader,
                dispatcher,
                stats,
                events,
                exclusion: None,
                locator: None,
                runout: None,
                state: Mutex::new(JobState::default()),
                running,
            }),
        }
    }

    /// Route region bookkeeping through the exclusion service
    pub fn with_exclusion(self, exclusion: Arc<ExcludeObject>) -> Self {
        self.map_inner(|inner| inner.exclusion = Some(exclusion))
    }

    /// Record every dispatched line in the resume locator
    pub fn with_locator(self, locator: Arc<ResumeLocator>) -> Self {
        self.map_inner(|inner| inner.locator = Some(locator))
    }

    /// Check material presence before the first line of each activation
    pub fn with_runout(self, runout: Arc<dyn RunoutSensor>) -> Self {
        self.map_inner(|inner| inner.runout = Some(runout))
    }

    fn map_inner(self, apply: impl FnOnce(&mut Inner)) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                apply(&mut inner);
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => {
                tracing::warn!("Executor already shared, collaborator not attached");
                Self { inner }
            }
        }
    }

    /// Register the job control commands
    pub fn register_commands(self: &Arc<Self>, dispatcher: &Arc<dyn CommandDispatcher>) {
        register_reply_handler(dispatcher, "SDCARD_PRINT_FILE", self, Self::cmd_print_file);
        register_reply_handler(dispatcher, "SDCARD_RESET_FILE", self, Self::cmd_reset_file);
        register_reply_handler(dispatcher, "RESUME_JOB", self, Self::cmd_resume);
        register_reply_handler(dispatcher, "PAUSE_JOB", self, Self::cmd_pause);
        register_reply_handler(dispatcher, "JOB_STATUS", self, Self::cmd_status);
        register_reply_handler(dispatcher, "SET_RESUME_OFFSET", self, Self::cmd_set_offset);
    }

    /// Open a job file positioned at `start_offset`
    ///
    /// A zero offset is a fresh job: the start script runs and the
    /// exclusion state is persisted. Any other offset is a resume and
    /// skips those side effects.
    pub fn load(&self, path: impl AsRef<Path>, start_offset: u64) -> Result<(), JobError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        if self.is_active() {
            return Err(JobError::Busy {
                action: "load".to_string(),
            });
        }

        let (file, size) = open_job(path).map_err(|e| {
            tracing::error!(path = %shown, error = %e, "Unable to open job file");
            JobError::Io {
                path: shown.clone(),
                reason: e.to_string(),
            }
        })?;

        {
            let mut state = self.inner.state.lock();
            if state.active {
                return Err(JobError::Busy {
                    action: "load".to_string(),
                });
            }
            state.file = Some(JobFile {
                handle: Arc::new(Mutex::new(file)),
                path: shown.clone(),
            });
            state.position = start_offset;
            state.next_position = start_offset;
            state.size = size;
            state.phase = JobPhase::Loading;
            state.cancel_requested = false;
            state.resume_pending = start_offset > 0;
            state.runout_paused = false;
            state.last_error = None;
        }

        tracing::info!(path = %shown, size, start_offset, "Job file opened");
        self.inner
            .dispatcher
            .respond_info(&format!("File opened:{} Size:{}", shown, size));
        self.inner.stats.set_current_file(&shown);

        if start_offset == 0 {
            if let Err(e) =
                run_script(self.inner.dispatcher.as_ref(), &self.inner.config.start_script)
            {
                tracing::error!(path = %shown, error = %e, "Start script failed, job unloaded");
                {
                    let mut state = self.inner.state.lock();
                    state.close();
                    state.phase = JobPhase::Idle;
                    state.last_error = Some(e.to_string());
                }
                self.inner.stats.reset();
                return Err(JobError::Dispatch {
                    offset: 0,
                    reason: e.to_string(),
                });
            }
            if let Some(exclusion) = &self.inner.exclusion {
                exclusion.persist_state();
            }
            self.inner
                .events
                .publish(JobEvent::Started { path: shown });
        }
        Ok(())
    }

    /// Reset any previous job, load `path` from the start and stream it
    pub fn print_file(&self, path: impl AsRef<Path>) -> Result<(), JobError> {
        if self.is_active() {
            return Err(JobError::Busy {
                action: "print".to_string(),
            });
        }
        self.reset_idle();
        self.load(path, 0)?;
        self.resume()
    }

    /// Reopen an interrupted job at `position` and stream it
    pub fn recover_print(
        &self,
        path: impl AsRef<Path>,
        position: u64,
        print_duration: f64,
    ) -> Result<(), JobError> {
        tracing::info!(
            path = %path.as_ref().display(),
            position,
            print_duration,
            "Recovering interrupted job"
        );
        self.inner.stats.set_print_duration(print_duration);
        self.load(path, position)?;
        self.resume()
    }

    /// Start the dispatch loop
    ///
    /// After a mid-job runout pause the resume offset is first moved back
    /// to the line where material went missing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn resume(&self) -> Result<(), JobError> {
        let relocate = {
            let mut state = self.inner.state.lock();
            if state.active {
                return Err(JobError::Busy {
                    action: "resume".to_string(),
                });
            }
            if state.file.is_none() {
                return Err(JobError::NoActiveJob);
            }
            std::mem::take(&mut state.runout_paused)
        };
        if relocate {
            self.relocate_after_runout();
        }

        {
            let mut state = self.inner.state.lock();
            if state.active {
                return Err(JobError::Busy {
                    action: "resume".to_string(),
                });
            }
            if state.file.is_none() {
                return Err(JobError::NoActiveJob);
            }
            state.active = true;
            state.must_pause = false;
            state.cancel_requested = false;
            state.phase = JobPhase::Running;
            self.inner.running.send_replace(true);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let exit = inner.stream().await;
            inner.finish(exit);
        });
        Ok(())
    }

    fn relocate_after_runout(&self) {
        let Some(locator) = &self.inner.locator else {
            return;
        };
        match locator.restore_context(RUNOUT_CONTEXT) {
            Some(result) => tracing::info!(
                offset = result.candidate.as_ref().map(|r| r.offset),
                examined = result.examined,
                "Resume relocated after runout"
            ),
            None => tracing::info!("No runout context, resuming in place"),
        }
    }

    /// Ask the loop to stop before its next line
    pub fn request_pause(&self) {
        let mut state = self.inner.state.lock();
        if state.active {
            state.must_pause = true;
        }
    }

    /// Stop the loop and wait until it has exited
    ///
    /// Called from a line of the job itself, only the request is made.
    pub async fn pause(&self) {
        self.request_pause();
        if !self.is_from_job() {
            self.wait_idle().await;
        }
    }

    /// Ask the loop to stop and close the job
    pub fn request_cancel(&self) {
        let closed = {
            let mut state = self.inner.state.lock();
            if state.active {
                state.must_pause = true;
                state.cancel_requested = true;
                false
            } else if state.file.is_some() {
                state.close();
                state.phase = JobPhase::Cancelled;
                true
            } else {
                state.position = 0;
                state.size = 0;
                false
            }
        };
        if closed {
            self.inner.stats.note_cancel();
            self.inner.events.publish(JobEvent::Cancelled);
        }
    }

    /// Cancel the job and wait for the loop to exit
    pub async fn cancel(&self) {
        self.request_cancel();
        if !self.is_from_job() {
            self.wait_idle().await;
        }
    }

    /// Close the job, clear statistics and reset the exclusion state
    pub async fn reset_file(&self) -> Result<(), JobError> {
        if self.is_from_job() {
            return Err(JobError::Busy {
                action: "reset from within the job".to_string(),
            });
        }
        self.pause().await;
        self.reset_idle();
        Ok(())
    }

    fn reset_idle(&self) {
        {
            let mut state = self.inner.state.lock();
            state.close();
            state.phase = JobPhase::Idle;
            state.last_error = None;
        }
        self.inner.stats.reset();
        if let Some(exclusion) = &self.inner.exclusion {
            exclusion.reset_file();
        }
    }

    /// Wait until no dispatch loop is running
    pub async fn wait_idle(&self) {
        let mut running = self.inner.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }

    /// Set the offset the next activation starts reading from
    ///
    /// Rejected while streaming.
    pub fn set_file_position(&self, pos: u64) -> Result<(), JobError> {
        let mut state = self.inner.state.lock();
        if state.active {
            return Err(JobError::Busy {
                action: "set file position".to_string(),
            });
        }
        state.position = pos;
        Ok(())
    }

    /// Offset following the line being dispatched
    pub fn file_position(&self) -> u64 {
        self.inner.state.lock().next_position
    }

    /// Make the loop continue from `pos` after the current line
    pub fn set_next_file_position(&self, pos: u64) {
        self.inner.state.lock().next_position = pos;
    }

    /// Whether the dispatch loop is running
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    /// Whether the caller is running inside a dispatched job line
    pub fn is_from_job(&self) -> bool {
        self.inner.state.lock().from_job
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> JobPhase {
        self.inner.state.lock().phase
    }

    /// Status snapshot
    pub fn report_status(&self) -> JobStatus {
        JobStatus::from_state(&self.inner.state.lock())
    }

    /// Short progress line while streaming
    pub fn stats(&self) -> (bool, String) {
        let state = self.inner.state.lock();
        if state.active {
            (true, format!("sd_pos={}", state.position))
        } else {
            (false, String::new())
        }
    }

    /// Stop streaming on host shutdown and log where the job was
    pub fn on_shutdown(&self) {
        let (file, position) = {
            let mut state = self.inner.state.lock();
            if !state.active {
                return;
            }
            state.must_pause = true;
            match &state.file {
                Some(job) => (Arc::clone(&job.handle), state.position),
                None => return,
            }
        };

        let read_pos = position.saturating_sub(1024);
        let before_len = (position - read_pos) as usize;
        match reader::read_at(&file, read_pos, before_len + 128) {
            Ok(data) => {
                let split = before_len.min(data.len());
                tracing::info!(
                    read_pos,
                    position,
                    before = %String::from_utf8_lossy(&data[..split]).escape_debug(),
                    upcoming = %String::from_utf8_lossy(&data[split..]).escape_debug(),
                    "Job shutdown context"
                );
            }
            Err(e) => tracing::error!(error = %e, "Job shutdown read failed"),
        }
    }

    fn cmd_print_file(&self, cmd: &CommandLine) -> CommandReply {
        let filename = cmd.require("FILENAME")?;
        self.print_file(filename)?;
        Ok(Some("File selected".to_string()))
    }

    fn cmd_reset_file(&self, _cmd: &CommandLine) -> CommandReply {
        if self.is_from_job() {
            return Err(CommandError::rejected(
                "SDCARD_RESET_FILE cannot be run from the job",
            ));
        }
        if self.is_active() {
            return Err(JobError::Busy {
                action: "reset".to_string(),
            }
            .into());
        }
        self.reset_idle();
        Ok(None)
    }

    fn cmd_resume(&self, _cmd: &CommandLine) -> CommandReply {
        self.resume()?;
        Ok(None)
    }

    fn cmd_pause(&self, _cmd: &CommandLine) -> CommandReply {
        self.request_pause();
        Ok(None)
    }

    fn cmd_status(&self, _cmd: &CommandLine) -> CommandReply {
        let state = self.inner.state.lock();
        if state.file.is_none() {
            return Ok(Some("Not SD printing.".to_string()));
        }
        Ok(Some(format!(
            "SD printing byte {}/{}",
            state.position, state.size
        )))
    }

    fn cmd_set_offset(&self, cmd: &CommandLine) -> CommandReply {
        let offset = cmd
            .get_int("OFFSET")?
            .ok_or_else(|| cmd.malformed("OFFSET", "missing"))?;
        let offset = u64::try_from(offset).map_err(|_| cmd.malformed("OFFSET", "negative"))?;
        if self.is_from_job() {
            self.set_next_file_position(offset);
        } else {
            self.set_file_position(offset)?;
        }
        Ok(None)
    }
}

impl ResumeTarget for StreamExecutor {
    fn resume_file_position(&self) -> u64 {
        self.inner.state.lock().position
    }

    fn set_resume_file_position(&self, pos: u64) {
        tracing::info!(pos, "Resume file position set");
        self.inner.state.lock().position = pos;
    }
}

impl std::fmt::Debug for StreamExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamExecutor")
            .field("status", &self.report_status())
            .finish()
    }
}

fn open_job(path: &Path) -> std::io::Result<(File, u64)> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

impl Inner {
    async fn stream(&self) -> StreamExit {
        let (file, mut position, size, resume_pending) = {
            let mut state = self.state.lock();
            let Some(job) = state.file.as_ref() else {
                return StreamExit::Failed(JobError::NoActiveJob.to_string());
            };
            let file = Arc::clone(&job.handle);
            let resume_pending = std::mem::take(&mut state.resume_pending);
            (file, state.position, state.size, resume_pending)
        };

        tracing::info!(position, "Starting job stream");
        if let Err(e) = reader::seek(&file, position) {
            return self.fail(format!("seek failed: {}", e));
        }
        self.stats.note_start();

        if resume_pending {
            if let Err(e) = run_script(self.dispatcher.as_ref(), &self.config.resume_prepare_script)
            {
                return self.fail(format!("resume preparation failed: {}", e));
            }
            position = self.realign(&file, position);
            if let Err(e) = reader::seek(&file, position) {
                return self.fail(format!("seek failed: {}", e));
            }
            let mut state = self.state.lock();
            state.position = position;
            state.next_position = position;
        }

        let backoff = Duration::from_millis(self.config.contention_backoff_ms);
        let mut splitter = LineSplitter::new();
        let mut lines: VecDeque<Vec<u8>> = VecDeque::new();
        let mut pre_checked = false;
        let mut finish_ran = false;

        loop {
            if self.state.lock().must_pause {
                return StreamExit::Stopped;
            }

            if lines.is_empty() {
                let chunk = match self.reader.read(&file).await {
                    Ok(chunk) => chunk,
                    Err(e) => return self.fail(format!("read failed: {}", e)),
                };
                if chunk.is_empty() {
                    if let Some(tail) = splitter.finish() {
                        lines.push_back(tail);
                        continue;
                    }
                    let path = {
                        let mut state = self.state.lock();
                        state.file.take().map(|job| job.path).unwrap_or_default()
                    };
                    tracing::info!(position, "Finished job file");
                    self.dispatcher.respond_info("Done printing file");
                    return StreamExit::Finished { path };
                }
                lines.extend(splitter.push(&chunk));
                tokio::task::yield_now().await;
                continue;
            }

            if !self.dispatcher.try_acquire() {
                tokio::time::sleep(backoff).await;
                continue;
            }

            let Some(line) = lines.pop_front() else {
                continue;
            };
            let text = String::from_utf8_lossy(&line).into_owned();
            let next = (position + line.len() as u64 + 1).min(size.max(position));

            if let Some(runout) = self.runout.as_ref().filter(|_| self.config.runout_check) {
                if !runout.filament_present() {
                    if !pre_checked {
                        tracing::warn!(position, "No filament detected, pausing before first line");
                        return StreamExit::Stopped;
                    }
                    return self.runout_pause(position);
                }
            }
            pre_checked = true;

            {
                let mut state = self.state.lock();
                state.next_position = next;
                state.from_job = true;
            }
            if let Some(locator) = &self.locator {
                locator.record_begin(&text, position);
            }
            let result = self.dispatcher.dispatch(&text);
            self.state.lock().from_job = false;

            match result {
                Ok(()) => {
                    if let Some(locator) = &self.locator {
                        locator.record_end();
                    }
                }
                Err(CommandError::ExclusionOverrun { object, count }) => {
                    tracing::warn!(object = %object, count, position, "Exclusion overrun, finishing job");
                    self.events.publish(JobEvent::ExclusionOverrun { object });
                    position = size;
                    {
                        let mut state = self.state.lock();
                        state.position = size;
                        state.next_position = size;
                    }
                    if !finish_ran {
                        finish_ran = true;
                        if let Err(e) = run_script(
                            self.dispatcher.as_ref(),
                            &self.config.exclusion_finish_script,
                        ) {
                            tracing::error!(error = %e, "Exclusion finish sequence failed");
                        }
                    }
                    if let Err(e) = reader::seek(&file, size) {
                        return self.fail(format!("seek failed: {}", e));
                    }
                    lines.clear();
                    splitter.reset();
                    continue;
                }
                Err(e) => return self.fail(e.to_string()),
            }

            if let Some(delay) = self.exclusion.as_ref().and_then(|e| e.take_settle_delay()) {
                tokio::time::sleep(delay).await;
            }

            position = {
                let mut state = self.state.lock();
                state.position = state.next_position;
                state.position
            };
            if position != next {
                tracing::debug!(from = next, to = position, "Job position skip");
                if let Err(e) = reader::seek(&file, position) {
                    return self.fail(format!("seek failed: {}", e));
                }
                lines.clear();
                splitter.reset();
            }
        }
    }

    fn realign(&self, file: &SharedFile, position: u64) -> u64 {
        let Some(exclusion) = self.exclusion.as_ref().filter(|e| e.has_excluded()) else {
            return position;
        };
        let found = {
            let mut handle = file.lock();
            rewind::realign_to_region_start(&mut *handle, position, self.reader.chunk_size())
        };
        match found {
            Ok(Some(start)) => {
                tracing::info!(from = position, to = start, "Resume realigned to region start");
                exclusion.clear_warmup();
                start
            }
            Ok(None) => position,
            Err(e) => {
                tracing::warn!(error = %e, "Region start search failed");
                position
            }
        }
    }

    fn runout_pause(&self, position: u64) -> StreamExit {
        tracing::warn!(position, "Filament runout, pausing job");
        if let Some(locator) = &self.locator {
            locator.save_context(RUNOUT_CONTEXT, self.stats.print_duration());
            self.state.lock().runout_paused = true;
        }
        self.dispatcher
            .respond_info(&format!("Filament runout at byte {}", position));
        StreamExit::Stopped
    }

    fn fail(&self, message: String) -> StreamExit {
        tracing::error!(error = %message, "Job failed");
        if let Err(e) = run_script(self.dispatcher.as_ref(), &self.config.error_script) {
            tracing::error!(error = %e, "Error script failed");
        }
        StreamExit::Failed(message)
    }

    fn finish(&self, exit: StreamExit) {
        let cancelled = {
            let mut state = self.state.lock();
            state.from_job = false;
            state.must_pause = false;
            let cancelled = std::mem::take(&mut state.cancel_requested);
            match &exit {
                StreamExit::Failed(message) => {
                    state.phase = JobPhase::Error;
                    state.last_error = Some(message.clone());
                    if cancelled {
                        state.close();
                    }
                }
                StreamExit::Stopped if cancelled => {
                    state.close();
                    state.phase = JobPhase::Cancelled;
                }
                StreamExit::Stopped => state.phase = JobPhase::Paused,
                StreamExit::Finished { .. } => state.phase = JobPhase::Completed,
            }
            tracing::info!(position = state.position, phase = %state.phase, "Exiting job stream");
            cancelled
        };

        match exit {
            StreamExit::Failed(message) => {
                self.stats.note_error(&message);
                self.events.publish(JobEvent::Failed { error: message });
            }
            StreamExit::Stopped if cancelled => {
                self.stats.note_cancel();
                self.events.publish(JobEvent::Cancelled);
            }
            StreamExit::Stopped => {
                self.stats.note_pause();
                let position = self.state.lock().position;
                self.events.publish(JobEvent::Paused { position });
            }
            StreamExit::Finished { path } => {
                self.stats.note_complete();
                if let Err(e) = run_script(self.dispatcher.as_ref(), &self.config.end_script) {
                    tracing::error!(error = %e, "End script failed");
                }
                self.events.publish(JobEvent::Completed { path });
            }
        }

        let mut state = self.state.lock();
        state.active = false;
        self.running.send_replace(false);
    }
}
