use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value as JsonValue};
use worklets_common::{Props, PropsCommitter};
use worklets_runtime::{ResourceLimits, RuntimeConfig};

use crate::host::{parse_event, run, HostOptions, JsonLinesCommitter};

/// Writer whose contents stay readable after it is handed to a committer.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn lines(&self) -> Vec<JsonValue> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn create_test_script(content: &str) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), content).unwrap();
    file
}

fn options(script: &tempfile::NamedTempFile, frames: u32) -> HostOptions {
    HostOptions {
        script: script.path().to_path_buf(),
        frames,
        frame_interval: Duration::from_millis(1),
        config: RuntimeConfig::default(),
        events: Vec::new(),
    }
}

#[test]
fn test_json_lines_format() {
    let buffer = SharedBuffer::default();
    let committer = JsonLinesCommitter::new(buffer.clone());
    let mut props = Props::new();
    props.insert("opacity".to_string(), json!(0.5));

    committer.commit(12, props);
    assert_eq!(buffer.lines(), vec![json!({"viewTag": 12, "props": {"opacity": 0.5}})]);
}

#[test]
fn test_parse_event() {
    let (name, payload) = parse_event("onScroll={\"y\":120}").unwrap();
    assert_eq!(name, "onScroll");
    assert_eq!(payload, json!({"y": 120}));

    // Only the first '=' separates the name.
    let (_, payload) = parse_event("onInput={\"text\":\"a=b\"}").unwrap();
    assert_eq!(payload["text"], "a=b");

    assert!(parse_event("onScroll").is_err());
    assert!(parse_event("={}").is_err());
    assert!(parse_event("onScroll={").is_err());
}

#[tokio::test]
async fn test_run_commits_props_from_worklets_and_events() {
    let script = create_test_script(
        r#"
        worklets.runOnUI(worklets.makeWorklet(
            "function (opacity) { _updateProps(2, { opacity }); }"
        ))(0.5);

        worklets.registerEventHandler(
            "onScroll",
            worklets.makeWorklet("function (event) { _updateProps(1, { offset: event.y }); }")
        );
        "#,
    );
    let buffer = SharedBuffer::default();
    let mut options = options(&script, 2);
    options.events.push(("onScroll".to_string(), json!({"y": 5})));

    let report = run(options, Arc::new(JsonLinesCommitter::new(buffer.clone()))).await.unwrap();
    assert_eq!(report.frames, 2);
    // Nothing requested a frame.
    assert_eq!(report.frames_rendered, 0);
    assert!(report.errors.is_empty());

    let lines = buffer.lines();
    assert_eq!(
        lines,
        vec![
            json!({"viewTag": 2, "props": {"opacity": 0.5}}),
            json!({"viewTag": 1, "props": {"offset": 5}}),
        ]
    );
}

#[tokio::test]
async fn test_run_renders_mappers_every_frame() {
    let script = create_test_script(
        r#"
        const frames = worklets.makeMutable(0);
        worklets.startMapper(
            worklets.makeWorklet(
                "function () { frames.value = frames.value + 1; _updateProps(7, { frame: frames.value }); }",
                { frames }
            ),
            [],
            [frames]
        );
        "#,
    );
    let buffer = SharedBuffer::default();

    let report = run(options(&script, 3), Arc::new(JsonLinesCommitter::new(buffer.clone()))).await.unwrap();
    assert_eq!(report.frames, 3);
    // Starting the mapper requests the first frame and its write the second;
    // the third tick has nothing to do.
    assert_eq!(report.frames_rendered, 2);

    // A mapper without inputs runs once.
    assert_eq!(buffer.lines(), vec![json!({"viewTag": 7, "props": {"frame": 1}})]);
}

#[tokio::test]
async fn test_run_reports_worklet_errors() {
    let script = create_test_script(
        r#"
        worklets.runOnUI(worklets.makeWorklet("function () { throw new Error('bad frame'); }", {}, "bad.js (1:1)"))();
        "#,
    );

    let report = run(options(&script, 1), Arc::new(JsonLinesCommitter::new(SharedBuffer::default())))
        .await
        .unwrap();
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("bad frame"));
}

#[tokio::test]
async fn test_run_fails_on_script_error() {
    let script = create_test_script("this is not javascript");
    let result = run(options(&script, 1), Arc::new(JsonLinesCommitter::new(SharedBuffer::default()))).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_run_fails_on_missing_script() {
    let script = create_test_script("");
    let mut options = options(&script, 1);
    options.script = script.path().with_extension("missing");

    let err = run(options, Arc::new(JsonLinesCommitter::new(SharedBuffer::default())))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Failed to read script"));
}

#[tokio::test]
async fn test_loop_limit_stops_runaway_script() {
    let script = create_test_script("while (true) {}");
    let mut options = options(&script, 1);
    options.config = RuntimeConfig::new().with_limits(ResourceLimits::new().with_loop_iteration_limit(1_000));

    let result = run(options, Arc::new(JsonLinesCommitter::new(SharedBuffer::default()))).await;
    assert!(result.is_err());
}
