//! Task functions compiled into the executor binary.

use std::fs;
use std::thread;
use std::time::Duration;

use anyhow::{Context as _, bail};
use rill_core::{Args, Context, FunctionRegistry, Value};

/// Registry with every built-in function.
pub fn registry() -> rill_core::Result<FunctionRegistry> {
    let mut registry = FunctionRegistry::new();
    registry.register("echo", echo)?;
    registry.register("concat", concat)?;
    registry.register("write_file", write_file)?;
    registry.register("sleep", sleep)?;
    registry.register("fail", fail)?;
    Ok(registry)
}

/// Keyword argument `name`, falling back to positional `index`.
fn argument<'a>(args: &'a Args, name: &str, index: usize) -> Option<&'a Value> {
    args.named(name).or_else(|| args.get(index))
}

/// Raw bytes of a string, bytes or data argument.
fn bytes_of(value: &Value) -> anyhow::Result<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes.clone()),
        Value::Str(text) => Ok(text.as_bytes().to_vec()),
        Value::Data(instance) => Ok(instance.read_bytes()?.into_owned()),
        other => bail!("expected bytes, str or data, got {}", other.type_name()),
    }
}

/// Return the first positional argument unchanged.
fn echo(_ctx: &mut Context, args: Args) -> anyhow::Result<Value> {
    Ok(args.positional.into_iter().next().unwrap_or(Value::None))
}

/// Concatenate the bytes of all positional arguments.
fn concat(_ctx: &mut Context, args: Args) -> anyhow::Result<Value> {
    let mut out = Vec::new();
    for (index, value) in args.positional.iter().enumerate() {
        let bytes = bytes_of(value).with_context(|| format!("argument {}", index))?;
        out.extend_from_slice(&bytes);
    }
    Ok(Value::Bytes(out))
}

/// Write `content` to `name` in the working directory and return it staged.
fn write_file(ctx: &mut Context, args: Args) -> anyhow::Result<Value> {
    let Some(name) = argument(&args, "name", 0).and_then(Value::as_str) else {
        bail!("write_file needs a file name");
    };
    let content = match argument(&args, "content", 1) {
        Some(value) => bytes_of(value)?,
        None => Vec::new(),
    };

    fs::write(ctx.work_dir().join(name), &content)
        .with_context(|| format!("Failed to write {}", name))?;
    ctx.debug(format!("wrote {} bytes to {}", content.len(), name));

    let staged = ctx.stage_file(name, None)?;
    Ok(Value::Data(staged))
}

/// Sleep for `seconds`.
fn sleep(_ctx: &mut Context, args: Args) -> anyhow::Result<Value> {
    let seconds = match argument(&args, "seconds", 0) {
        Some(Value::Int(i)) => *i as f64,
        Some(Value::Float(f)) => *f,
        Some(other) => bail!("seconds must be a number, got {}", other.type_name()),
        None => bail!("sleep needs a duration in seconds"),
    };
    let duration = Duration::try_from_secs_f64(seconds)
        .with_context(|| format!("invalid duration: {} seconds", seconds))?;

    thread::sleep(duration);
    Ok(Value::None)
}

/// Fail with the given message.
fn fail(_ctx: &mut Context, args: Args) -> anyhow::Result<Value> {
    let message = argument(&args, "message", 0)
        .and_then(Value::as_str)
        .unwrap_or("task failed");
    bail!("{}", message)
}
