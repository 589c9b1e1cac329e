//! End-to-end tests of the executor against a simulated governor.
//!
//! The executor runs on its own thread; the test drives it over one end of
//! a Unix socket pair exactly as the governor would.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use anyhow::bail;
use tempfile::TempDir;

use rill_core::execute::{encode_keywords, encode_positional};
use rill_core::ipc::{
    CallMessage, Channel, DataLocation, ExecutorMessage, GovernorMessage, InputSlot,
    PROTOCOL_VERSION, ResultMessage,
};
use rill_core::spec::{Resources, TaskConfig};
use rill_core::{
    ArgValue, Args, Context, Error, Executor, ExecutorConfig, FunctionRef, FunctionRegistry,
    ObjectId, ObjectSpec, Placeholder, TaskId, TaskSpec, Value,
};

const SESSION: i32 = 1;

fn hi(_ctx: &mut Context, _args: Args) -> anyhow::Result<Value> {
    Ok(Value::Bytes(b"hi".to_vec()))
}

fn boom(ctx: &mut Context, _args: Args) -> anyhow::Result<Value> {
    fs::write(ctx.work_dir().join("partial.bin"), b"half done")?;
    ctx.stage_file("partial.bin", None)?;
    ctx.debug("about to fail");
    bail!("boom")
}

fn stage(ctx: &mut Context, _args: Args) -> anyhow::Result<Value> {
    fs::write(ctx.work_dir().join("result.txt"), b"staged content")?;
    let staged = ctx.stage_file("result.txt", Some("text"))?;
    Ok(Value::Data(staged))
}

fn identity(_ctx: &mut Context, args: Args) -> anyhow::Result<Value> {
    Ok(args.get(0).cloned().unwrap_or(Value::None))
}

fn pair(_ctx: &mut Context, _args: Args) -> anyhow::Result<Value> {
    Ok(Value::List(vec![Value::Int(1), Value::Int(2)]))
}

fn labeled(_ctx: &mut Context, _args: Args) -> anyhow::Result<Value> {
    let mut map = BTreeMap::new();
    map.insert("first".to_string(), Value::Int(1));
    map.insert("second".to_string(), Value::Int(2));
    Ok(Value::Map(map))
}

fn sum(_ctx: &mut Context, args: Args) -> anyhow::Result<Value> {
    let mut total = 0;
    for value in &args.positional {
        match value.as_int() {
            Some(i) => total += i,
            None => bail!("cannot add {}", value.type_name()),
        }
    }
    Ok(Value::Int(total))
}

fn greet(_ctx: &mut Context, args: Args) -> anyhow::Result<Value> {
    let name = args.named("name").and_then(Value::as_str).unwrap_or("nobody");
    Ok(Value::Str(format!("hello {}", name)))
}

fn explode(_ctx: &mut Context, _args: Args) -> anyhow::Result<Value> {
    panic!("kaboom")
}

fn registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry.register("hi", hi).unwrap();
    registry.register("boom", boom).unwrap();
    registry.register("stage", stage).unwrap();
    registry.register("identity", identity).unwrap();
    registry.register("pair", pair).unwrap();
    registry.register("labeled", labeled).unwrap();
    registry.register("sum", sum).unwrap();
    registry.register("greet", greet).unwrap();
    registry.register("explode", explode).unwrap();
    registry
}

/// Governor side of a running executor.
struct Governor {
    channel: Channel<UnixStream>,
    executor: JoinHandle<rill_core::Result<()>>,
    root: PathBuf,
    _temp: TempDir,
    next_task: i32,
}

impl Governor {
    fn start() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let root = temp.path().join("executor");
        let (ours, theirs) = UnixStream::pair().expect("Failed to create socket pair");

        let config = ExecutorConfig::new(9).with_work_root(&root);
        let executor = thread::spawn(move || {
            let mut executor = Executor::register(theirs, config, registry())?;
            executor.run()
        });

        let mut channel = Channel::new(ours);
        let register: ExecutorMessage = channel.receive().expect("Failed to receive register");
        assert_eq!(
            register,
            ExecutorMessage::Register {
                protocol: PROTOCOL_VERSION.to_string(),
                executor_id: 9,
                executor_type: "rust".to_string(),
            }
        );

        Self {
            channel,
            executor,
            root,
            _temp: temp,
            next_task: 1,
        }
    }

    fn staging_dir(&self) -> PathBuf {
        fs::canonicalize(&self.root)
            .expect("Executor root must exist")
            .join("staging")
    }

    fn call(
        &mut self,
        inputs: Vec<InputSlot>,
        outputs: Vec<ObjectSpec>,
        config: TaskConfig,
    ) -> ResultMessage {
        let id = TaskId::new(SESSION, self.next_task);
        self.next_task += 1;

        self.channel
            .send(&GovernorMessage::Call(CallMessage {
                spec: TaskSpec {
                    id,
                    task_type: "rust/call".to_string(),
                    config,
                    resources: Resources::default(),
                },
                inputs,
                outputs,
            }))
            .expect("Failed to send call");

        match self.channel.receive().expect("Failed to receive result") {
            ExecutorMessage::Result(result) => {
                assert_eq!(result.task, id);
                result
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    fn drop_cached(&mut self, objects: Vec<ObjectId>) {
        self.channel
            .send(&GovernorMessage::DropCached { objects })
            .expect("Failed to send drop_cached");
    }

    /// Close the channel and return the error the executor stopped with.
    fn finish(self) -> Error {
        drop(self.channel);
        self.executor
            .join()
            .expect("Executor thread panicked")
            .expect_err("Executor must stop with an error")
    }
}

fn object(id: i32) -> ObjectId {
    ObjectId::new(SESSION, id)
}

fn closure(id: i32, name: &str) -> InputSlot {
    InputSlot {
        spec: ObjectSpec::blob(object(id), "fn"),
        data: DataLocation::Memory(FunctionRef::new(name).encode().unwrap()),
        cache: false,
    }
}

fn cached_closure(id: i32) -> InputSlot {
    InputSlot {
        spec: ObjectSpec::blob(object(id), "fn"),
        data: DataLocation::Cached(object(id)),
        cache: false,
    }
}

fn memory_input(id: i32, bytes: &[u8], content_type: Option<&str>) -> InputSlot {
    let mut spec = ObjectSpec::blob(object(id), format!("in{}", id));
    spec.content_type = content_type.map(str::to_string);
    InputSlot {
        spec,
        data: DataLocation::Memory(bytes.to_vec()),
        cache: false,
    }
}

fn outputs(labels: &[&str]) -> Vec<ObjectSpec> {
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| ObjectSpec::blob(object(100 + i as i32), *label))
        .collect()
}

fn positional(args: &[ArgValue]) -> TaskConfig {
    TaskConfig {
        args: encode_positional(args).unwrap(),
        ..TaskConfig::default()
    }
}

fn staged_count(dir: &Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[test]
fn test_bytes_output_is_memory() {
    let mut governor = Governor::start();

    let result = governor.call(vec![closure(1, "hi")], outputs(&["out"]), TaskConfig::default());

    assert!(result.success, "{:?}", result.info.error);
    assert_eq!(result.outputs.len(), 1);
    assert_eq!(result.outputs[0].data, DataLocation::Memory(b"hi".to_vec()));
    assert_eq!(result.outputs[0].content_type, None);
    assert_eq!(result.cached_objects, vec![object(1)]);

    assert!(matches!(governor.finish(), Error::ConnectionLost));
}

#[test]
fn test_failure_reports_error_and_removes_staged_files() {
    let mut governor = Governor::start();

    let result = governor.call(vec![closure(1, "boom")], outputs(&["out"]), TaskConfig::default());

    assert!(!result.success);
    assert!(result.info.error.as_deref().unwrap_or("").contains("boom"));
    assert_eq!(result.info.debug, "about to fail");
    assert!(result.outputs.is_empty());
    assert!(result.cached_objects.is_empty());
    assert_eq!(staged_count(&governor.staging_dir()), 0);

    // The closure was rolled back, so sending it again reports it again.
    let again = governor.call(vec![closure(1, "hi")], outputs(&["out"]), TaskConfig::default());
    assert_eq!(again.cached_objects, vec![object(1)]);
}

#[test]
fn test_staged_file_output_is_path() {
    let mut governor = Governor::start();

    let result = governor.call(vec![closure(1, "stage")], outputs(&["out"]), TaskConfig::default());

    assert!(result.success, "{:?}", result.info.error);
    let DataLocation::Path(path) = &result.outputs[0].data else {
        panic!("expected a path output, got {:?}", result.outputs[0].data);
    };
    assert_eq!(fs::read(path).unwrap(), b"staged content");
    assert!(Path::new(path).starts_with(governor.staging_dir()));
    assert_eq!(result.outputs[0].content_type.as_deref(), Some("text"));
}

#[test]
fn test_closure_reported_only_on_first_transmission() {
    let mut governor = Governor::start();

    let first = governor.call(vec![closure(1, "hi")], outputs(&["out"]), TaskConfig::default());
    let second = governor.call(vec![cached_closure(1)], outputs(&["out"]), TaskConfig::default());
    // Sending the data again does not replace or re-report the entry.
    let third = governor.call(vec![closure(1, "hi")], outputs(&["out"]), TaskConfig::default());

    assert_eq!(first.cached_objects, vec![object(1)]);
    assert!(second.success, "{:?}", second.info.error);
    assert!(second.cached_objects.is_empty());
    assert!(third.cached_objects.is_empty());
}

#[test]
fn test_cached_input_flag() {
    let mut governor = Governor::start();

    let mut data = memory_input(5, b"payload", None);
    data.cache = true;
    let first = governor.call(
        vec![closure(1, "identity"), data],
        outputs(&["out"]),
        positional(&[ArgValue::Placeholder(Placeholder::new(0).load(false))]),
    );
    assert_eq!(first.cached_objects, vec![object(1), object(5)]);

    let reused = InputSlot {
        spec: ObjectSpec::blob(object(5), "in5"),
        data: DataLocation::Cached(object(5)),
        cache: false,
    };
    let second = governor.call(
        vec![cached_closure(1), reused],
        outputs(&["out"]),
        positional(&[ArgValue::Placeholder(Placeholder::new(0).load(false))]),
    );
    assert!(second.success, "{:?}", second.info.error);
    assert_eq!(second.outputs[0].data, DataLocation::OtherObject(object(5)));
}

#[test]
fn test_unknown_cached_object_after_drop_is_fatal() {
    let mut governor = Governor::start();

    let first = governor.call(vec![closure(1, "hi")], outputs(&["out"]), TaskConfig::default());
    assert!(first.success);

    governor.drop_cached(vec![object(1), object(77)]);
    governor
        .channel
        .send(&GovernorMessage::Call(CallMessage {
            spec: TaskSpec {
                id: TaskId::new(SESSION, 99),
                task_type: "rust/call".to_string(),
                config: TaskConfig::default(),
                resources: Resources::default(),
            },
            inputs: vec![cached_closure(1)],
            outputs: outputs(&["out"]),
        }))
        .unwrap();

    assert!(matches!(
        governor.finish(),
        Error::UnknownCachedObject(id) if id == object(1)
    ));
}

#[test]
fn test_pass_through_input_is_other_object() {
    let mut governor = Governor::start();

    let result = governor.call(
        vec![closure(1, "identity"), memory_input(5, b"data", Some("json"))],
        outputs(&["out"]),
        positional(&[ArgValue::Placeholder(Placeholder::new(0).load(false))]),
    );

    assert!(result.success, "{:?}", result.info.error);
    assert_eq!(result.outputs[0].data, DataLocation::OtherObject(object(5)));
    assert_eq!(result.outputs[0].content_type.as_deref(), Some("json"));
}

#[test]
fn test_loaded_placeholders_and_keywords() {
    let mut governor = Governor::start();

    let mut kwargs = BTreeMap::new();
    kwargs.insert(
        "name".to_string(),
        ArgValue::Placeholder(Placeholder::new(0).load(true)),
    );
    let config = TaskConfig {
        kwargs: encode_keywords(&kwargs).unwrap(),
        encode_outputs: vec![Some("json".to_string())],
        ..TaskConfig::default()
    };

    let result = governor.call(
        vec![closure(1, "greet"), memory_input(5, b"\"world\"", Some("json"))],
        outputs(&["out"]),
        config,
    );

    assert!(result.success, "{:?}", result.info.error);
    assert_eq!(
        result.outputs[0].data,
        DataLocation::Memory(b"\"hello world\"".to_vec())
    );
    assert_eq!(result.outputs[0].content_type.as_deref(), Some("json"));
}

#[test]
fn test_output_arity_mismatch() {
    let mut governor = Governor::start();

    let result = governor.call(
        vec![closure(1, "pair")],
        outputs(&["a", "b", "c"]),
        TaskConfig::default(),
    );

    assert!(!result.success);
    let error = result.info.error.unwrap();
    assert!(error.contains('2') && error.contains('3'), "{}", error);
}

#[test]
fn test_no_outputs_rejects_value() {
    let mut governor = Governor::start();

    let result = governor.call(vec![closure(1, "pair")], vec![], TaskConfig::default());
    assert!(!result.success);
}

#[test]
fn test_labeled_outputs_follow_declaration_order() {
    let mut governor = Governor::start();

    let config = TaskConfig {
        encode_outputs: vec![Some("json".to_string()), Some("json".to_string())],
        ..TaskConfig::default()
    };
    let result = governor.call(
        vec![closure(1, "labeled")],
        outputs(&["second", "first"]),
        config,
    );

    assert!(result.success, "{:?}", result.info.error);
    assert_eq!(result.outputs[0].data, DataLocation::Memory(b"2".to_vec()));
    assert_eq!(result.outputs[1].data, DataLocation::Memory(b"1".to_vec()));
}

#[test]
fn test_repeated_calls_are_independent() {
    let mut governor = Governor::start();
    let encode_json = |mut config: TaskConfig| {
        config.encode_outputs = vec![Some("json".to_string())];
        config
    };

    let first = governor.call(
        vec![closure(1, "sum")],
        outputs(&["out"]),
        encode_json(positional(&[ArgValue::Int(1), ArgValue::Int(2)])),
    );
    let second = governor.call(
        vec![
            cached_closure(1),
            memory_input(6, b"40", Some("json")),
        ],
        outputs(&["out"]),
        encode_json(positional(&[
            ArgValue::Placeholder(Placeholder::new(0).load(true)),
            ArgValue::Int(2),
        ])),
    );
    let third = governor.call(
        vec![cached_closure(1)],
        outputs(&["out"]),
        encode_json(positional(&[ArgValue::Int(5)])),
    );

    assert_eq!(first.outputs[0].data, DataLocation::Memory(b"3".to_vec()));
    assert_eq!(second.outputs[0].data, DataLocation::Memory(b"42".to_vec()));
    assert_eq!(third.outputs[0].data, DataLocation::Memory(b"5".to_vec()));
}

#[test]
fn test_panic_is_reported_as_failure() {
    let mut governor = Governor::start();

    let result = governor.call(vec![closure(1, "explode")], outputs(&["out"]), TaskConfig::default());
    assert!(!result.success);
    assert!(result.info.error.unwrap().contains("kaboom"));

    // The executor keeps serving calls.
    let next = governor.call(vec![closure(2, "hi")], outputs(&["out"]), TaskConfig::default());
    assert!(next.success);
}

#[test]
fn test_unknown_function_and_placeholder_errors() {
    let mut governor = Governor::start();

    let unknown = governor.call(vec![closure(1, "nope")], outputs(&["out"]), TaskConfig::default());
    assert!(!unknown.success);
    assert!(unknown.info.error.unwrap().contains("nope"));

    let out_of_range = governor.call(
        vec![closure(2, "identity")],
        outputs(&["out"]),
        positional(&[ArgValue::Placeholder(Placeholder::new(3))]),
    );
    assert!(!out_of_range.success);
    assert!(out_of_range.info.error.unwrap().contains("placeholder"));
}

#[test]
fn test_malformed_frame_is_fatal() {
    use std::io::Write;

    let temp = TempDir::new().unwrap();
    let (mut ours, theirs) = UnixStream::pair().unwrap();
    let config = ExecutorConfig::new(2).with_work_root(temp.path());
    let executor = thread::spawn(move || {
        let mut executor = Executor::register(theirs, config, registry())?;
        executor.run()
    });

    // Frame with an unknown message tag.
    ours.write_all(&1u32.to_le_bytes()).unwrap();
    ours.write_all(&[42]).unwrap();

    let error = executor.join().unwrap().unwrap_err();
    assert!(matches!(error, Error::Protocol(_)));
}
