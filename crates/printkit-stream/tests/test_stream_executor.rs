use parking_lot::Mutex;
use printkit_core::{
    AppEvent, CommandDispatcher, CommandError, CommandHandler, CommandLine, EventBus,
    EventBusConfig, JobError, JobEvent, PrintStats, RunoutSensor,
};
use printkit_stream::{JobPhase, StreamConfig, StreamExecutor};
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Accepts every line, running a handler when one is registered
#[derive(Default)]
struct TestDispatcher {
    handlers: Mutex<HashMap<String, CommandHandler>>,
    lines: Mutex<Vec<String>>,
    responses: Mutex<Vec<String>>,
}

impl TestDispatcher {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl CommandDispatcher for TestDispatcher {
    fn register_command(&self, name: &str, handler: CommandHandler) {
        self.handlers.lock().insert(name.to_string(), handler);
    }

    fn dispatch(&self, line: &str) -> Result<(), CommandError> {
        let Some(cmd) = CommandLine::parse(line) else {
            return Ok(());
        };
        self.lines.lock().push(cmd.raw().to_string());
        let handler = self.handlers.lock().get(cmd.name()).cloned();
        match handler {
            Some(handler) => handler(&cmd),
            None => Ok(()),
        }
    }

    fn try_acquire(&self) -> bool {
        true
    }

    fn respond_info(&self, message: &str) {
        self.responses.lock().push(message.to_string());
    }
}

#[derive(Default)]
struct TestStats {
    notes: Mutex<Vec<String>>,
    duration: Mutex<f64>,
}

impl TestStats {
    fn notes(&self) -> Vec<String> {
        self.notes.lock().clone()
    }
}

impl PrintStats for TestStats {
    fn set_current_file(&self, _path: &str) {
        self.notes.lock().push("file".to_string());
    }
    fn note_start(&self) {
        self.notes.lock().push("start".to_string());
    }
    fn note_pause(&self) {
        self.notes.lock().push("pause".to_string());
    }
    fn note_complete(&self) {
        self.notes.lock().push("complete".to_string());
    }
    fn note_error(&self, _message: &str) {
        self.notes.lock().push("error".to_string());
    }
    fn note_cancel(&self) {
        self.notes.lock().push("cancel".to_string());
    }
    fn reset(&self) {
        self.notes.lock().push("reset".to_string());
    }
    fn print_duration(&self) -> f64 {
        *self.duration.lock()
    }
    fn set_print_duration(&self, seconds: f64) {
        *self.duration.lock() = seconds;
    }
}

struct Sensor(AtomicBool);

impl RunoutSensor for Sensor {
    fn filament_present(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Harness {
    executor: Arc<StreamExecutor>,
    dispatcher: Arc<TestDispatcher>,
    stats: Arc<TestStats>,
    events: Arc<EventBus>,
    job: NamedTempFile,
}

impl Harness {
    fn job_events(&self) -> Vec<JobEvent> {
        self.events
            .history()
            .into_iter()
            .filter_map(|event| match event {
                AppEvent::Job(job) => Some(job),
                _ => None,
            })
            .collect()
    }
}

fn quiet_config() -> StreamConfig {
    StreamConfig {
        start_script: String::new(),
        end_script: String::new(),
        read_retry_ms: 1,
        contention_backoff_ms: 1,
        ..Default::default()
    }
}

fn harness(config: StreamConfig, content: &str, runout: Option<Arc<Sensor>>) -> Harness {
    let mut job = NamedTempFile::new().unwrap();
    job.write_all(content.as_bytes()).unwrap();
    job.flush().unwrap();

    let dispatcher = Arc::new(TestDispatcher::default());
    let dyn_dispatcher: Arc<dyn CommandDispatcher> = dispatcher.clone();
    let stats = Arc::new(TestStats::default());
    let events = Arc::new(EventBus::with_config(EventBusConfig {
        enable_history: true,
        ..Default::default()
    }));
    let mut executor =
        StreamExecutor::new(config, dyn_dispatcher.clone(), stats.clone(), events.clone());
    if let Some(sensor) = runout {
        executor = executor.with_runout(sensor);
    }
    let executor = Arc::new(executor);
    executor.register_commands(&dyn_dispatcher);

    Harness {
        executor,
        dispatcher,
        stats,
        events,
        job,
    }
}

#[tokio::test]
async fn test_streams_file_to_completion() {
    let config = StreamConfig {
        start_script: "START".to_string(),
        end_script: "END".to_string(),
        ..quiet_config()
    };
    // The last line has no terminating newline
    let h = harness(config, "G1 X1\n; comment\nG1 X2\nG1 X3", None);

    h.executor.print_file(h.job.path()).unwrap();
    h.executor.wait_idle().await;

    assert_eq!(h.dispatcher.lines(), vec!["START", "G1 X1", "G1 X2", "G1 X3", "END"]);
    assert_eq!(h.executor.phase(), JobPhase::Completed);
    assert_eq!(h.stats.notes(), vec!["reset", "file", "start", "complete"]);

    let status = h.executor.report_status();
    assert!(!status.is_active);
    assert!(status.file_path.is_none());
    assert!(h
        .dispatcher
        .responses
        .lock()
        .contains(&"Done printing file".to_string()));

    let events = h.job_events();
    assert!(matches!(events.first(), Some(JobEvent::Started { .. })));
    assert!(matches!(events.last(), Some(JobEvent::Completed { .. })));
}

#[tokio::test]
async fn test_pause_from_job_and_resume() {
    let h = harness(quiet_config(), "G1 X1\nPAUSE_JOB\nG1 X2\n", None);

    h.executor.print_file(h.job.path()).unwrap();
    h.executor.wait_idle().await;

    assert_eq!(h.executor.phase(), JobPhase::Paused);
    assert_eq!(h.dispatcher.lines(), vec!["G1 X1", "PAUSE_JOB"]);
    let status = h.executor.report_status();
    assert_eq!(status.file_position, 16);
    assert!(status.file_path.is_some());
    assert!(h
        .job_events()
        .contains(&JobEvent::Paused { position: 16 }));

    h.executor.resume().unwrap();
    h.executor.wait_idle().await;

    assert_eq!(h.executor.phase(), JobPhase::Completed);
    assert_eq!(h.dispatcher.lines(), vec!["G1 X1", "PAUSE_JOB", "G1 X2"]);
    assert_eq!(
        h.stats.notes(),
        vec!["reset", "file", "start", "pause", "start", "complete"]
    );
}

#[tokio::test]
async fn test_set_resume_offset_skips_lines() {
    let first = format!("SET_RESUME_OFFSET OFFSET={:04}\n", 0);
    let target = first.len() + "G1 X1\n".len();
    let content = format!(
        "SET_RESUME_OFFSET OFFSET={:04}\nG1 X1\nG1 X2\n",
        target
    );
    let h = harness(quiet_config(), &content, None);

    h.executor.print_file(h.job.path()).unwrap();
    h.executor.wait_idle().await;

    let lines = h.dispatcher.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("SET_RESUME_OFFSET"));
    assert_eq!(lines[1], "G1 X2");
    assert_eq!(h.executor.phase(), JobPhase::Completed);
}

#[tokio::test]
async fn test_failing_line_runs_error_script_once() {
    let config = StreamConfig {
        error_script: "ON_ERROR".to_string(),
        ..quiet_config()
    };
    let h = harness(config, "G1 X1\nFAIL\nG1 X2\n", None);
    h.dispatcher.register_command(
        "FAIL",
        Arc::new(|_cmd: &CommandLine| Err(CommandError::rejected("heater fault"))),
    );

    h.executor.print_file(h.job.path()).unwrap();
    h.executor.wait_idle().await;

    assert_eq!(h.dispatcher.lines(), vec!["G1 X1", "FAIL", "ON_ERROR"]);
    assert_eq!(h.executor.phase(), JobPhase::Error);
    let status = h.executor.report_status();
    assert_eq!(status.last_error.as_deref(), Some("heater fault"));
    assert!(h.stats.notes().contains(&"error".to_string()));
    assert!(h.job_events().contains(&JobEvent::Failed {
        error: "heater fault".to_string()
    }));
}

#[tokio::test]
async fn test_runout_pauses_before_first_line() {
    let sensor = Arc::new(Sensor(AtomicBool::new(false)));
    let h = harness(quiet_config(), "G1 X1\nG1 X2\n", Some(sensor.clone()));

    h.executor.print_file(h.job.path()).unwrap();
    h.executor.wait_idle().await;

    assert_eq!(h.executor.phase(), JobPhase::Paused);
    assert!(h.dispatcher.lines().is_empty());
    assert_eq!(h.executor.report_status().file_position, 0);

    sensor.0.store(true, Ordering::SeqCst);
    h.executor.resume().unwrap();
    h.executor.wait_idle().await;

    assert_eq!(h.dispatcher.lines(), vec!["G1 X1", "G1 X2"]);
    assert_eq!(h.executor.phase(), JobPhase::Completed);
}

#[tokio::test]
async fn test_runout_mid_job_pauses_in_place() {
    let sensor = Arc::new(Sensor(AtomicBool::new(true)));
    let h = harness(quiet_config(), "G1 X1\nCLOG\nG1 X2\n", Some(sensor.clone()));
    let clog = sensor.clone();
    h.dispatcher.register_command(
        "CLOG",
        Arc::new(move |_cmd: &CommandLine| {
            clog.0.store(false, Ordering::SeqCst);
            Ok(())
        }),
    );

    h.executor.print_file(h.job.path()).unwrap();
    h.executor.wait_idle().await;

    assert_eq!(h.executor.phase(), JobPhase::Paused);
    assert_eq!(h.dispatcher.lines(), vec!["G1 X1", "CLOG"]);
    assert_eq!(h.executor.report_status().file_position, 11);

    // Without a locator the job continues where it stopped
    sensor.0.store(true, Ordering::SeqCst);
    h.executor.resume().unwrap();
    h.executor.wait_idle().await;

    assert_eq!(h.dispatcher.lines(), vec!["G1 X1", "CLOG", "G1 X2"]);
    assert_eq!(h.executor.phase(), JobPhase::Completed);
}

#[tokio::test]
async fn test_busy_while_streaming_and_cancel() {
    let content = "G1 X1\n".repeat(1000);
    let h = harness(quiet_config(), &content, None);

    h.executor.print_file(h.job.path()).unwrap();
    assert!(matches!(h.executor.resume(), Err(JobError::Busy { .. })));
    assert!(matches!(
        h.executor.load(h.job.path(), 0),
        Err(JobError::Busy { .. })
    ));
    assert!(matches!(
        h.executor.set_file_position(10),
        Err(JobError::Busy { .. })
    ));

    h.executor.cancel().await;

    assert_eq!(h.executor.phase(), JobPhase::Cancelled);
    let status = h.executor.report_status();
    assert!(status.file_path.is_none());
    assert_eq!(status.file_position, 0);
    assert!(h.stats.notes().contains(&"cancel".to_string()));
    assert!(h.job_events().contains(&JobEvent::Cancelled));
}

#[tokio::test]
async fn test_resume_from_file_position() {
    let h = harness(quiet_config(), "G1 X1\nG1 X2\nG1 X3\n", None);

    h.executor.load(h.job.path(), 0).unwrap();
    h.executor.set_file_position(6).unwrap();
    h.executor.resume().unwrap();
    h.executor.wait_idle().await;

    assert_eq!(h.dispatcher.lines(), vec!["G1 X2", "G1 X3"]);
}

#[tokio::test]
async fn test_resume_without_job() {
    let h = harness(quiet_config(), "G1 X1\n", None);
    assert!(matches!(h.executor.resume(), Err(JobError::NoActiveJob)));
    assert_eq!(h.executor.stats(), (false, String::new()));
}

#[tokio::test]
async fn test_missing_file() {
    let h = harness(quiet_config(), "", None);
    let result = h.executor.load("/nonexistent/job.gcode", 0);
    assert!(matches!(result, Err(JobError::Io { .. })));
    assert_eq!(h.executor.phase(), JobPhase::Idle);
}

#[tokio::test]
async fn test_status_command() {
    let h = harness(quiet_config(), "G1 X1\nG1 X2\n", None);
    h.dispatcher.dispatch("JOB_STATUS").unwrap();
    h.executor.load(h.job.path(), 0).unwrap();
    h.dispatcher.dispatch("JOB_STATUS").unwrap();

    let responses = h.dispatcher.responses.lock().clone();
    assert!(responses.contains(&"Not SD printing.".to_string()));
    assert!(responses.contains(&"SD printing byte 0/12".to_string()));
}

#[tokio::test]
async fn test_reset_file_closes_job() {
    let h = harness(quiet_config(), "G1 X1\n", None);
    h.executor.load(h.job.path(), 0).unwrap();
    h.executor.reset_file().await.unwrap();

    let status = h.executor.report_status();
    assert!(status.file_path.is_none());
    assert_eq!(status.phase, JobPhase::Idle);
}
