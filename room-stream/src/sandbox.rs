use std::sync::Arc;
use std::time::{Duration, Instant};

use md5::{Digest, Md5};
use parking_lot::Mutex;
use rquickjs::context::EvalOptions;
use rquickjs::{CatchResultExt, Coerced, Context, Ctx, Function, Object, Runtime, Value};

use crate::address::RoomAddress;
use crate::error::{StreamError, StreamResult};
use crate::types::{DeviceId, SignaturePayload};

/// Value every property of the browser stand-ins resolves to.
pub const NATIVE_CODE_SENTINEL: &str = "function () { [native code] }";

/// Global name the vendor script exports its signing routine under.
pub const DEFAULT_ENTRY: &str = "ub98484234";

/// Hidden global the entry function is parked under after evaluation.
const ENTRY_SLOT: &str = "__room_stream_entry";

const SENTINEL_FACTORY: &str = r#"(function (sentinel) {
    var reflect = function () { return sentinel; };
    var accept = function () { return true; };
    return new Proxy(Object.create(null), {
        get: reflect,
        has: accept,
        set: accept,
        deleteProperty: accept,
        defineProperty: accept
    });
})"#;

/**
    Resource limits applied to every sandbox.
*/
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub memory_limit: usize,
    pub max_stack_size: usize,
    /// Wall-clock budget for evaluating the script, and again for each call
    pub cpu_budget: Duration,
    /// Trailing expression selecting the exported entry point
    pub entry: String,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_limit: 32 * 1024 * 1024,
            max_stack_size: 1024 * 1024,
            cpu_budget: Duration::from_secs(2),
            entry: DEFAULT_ENTRY.to_string(),
        }
    }
}

/**
    Executes untrusted signing scripts inside an isolated QuickJS context.

    The context has the ECMAScript intrinsics and exactly three injected
    globals:
    - `CryptoJS.MD5(text)` returning the hex digest as a string
    - `window` and `document`, whose every property reads as
      [`NATIVE_CODE_SENTINEL`]

    Nothing else from the host is reachable: no modules, no timers, no I/O.
*/
#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    limits: SandboxLimits,
}

impl ScriptSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    /**
        Evaluate `source` followed by the entry expression and return the
        resulting function.

        Each call gets a fresh runtime, so nothing leaks between scripts.
    */
    pub fn execute(&self, source: &str) -> StreamResult<SigningFunction> {
        let runtime = Runtime::new().map_err(sandbox_error)?;
        runtime.set_memory_limit(self.limits.memory_limit);
        runtime.set_max_stack_size(self.limits.max_stack_size);

        let budget = CpuBudget::new(self.limits.cpu_budget);
        runtime.set_interrupt_handler(Some(budget.interrupt_handler()));

        let context = Context::full(&runtime).map_err(sandbox_error)?;
        let program = format!("{};{}", source, self.limits.entry);

        context
            .with(|ctx| {
                budget.run(|| {
                    install_globals(&ctx).map_err(|e| format!("failed to prepare sandbox: {e}"))?;

                    let value: Value = ctx
                        .eval_with_options(program, sloppy_script())
                        .catch(&ctx)
                        .map_err(|e| format!("script evaluation failed: {e}"))?;

                    if !value.is_function() {
                        return Err(format!(
                            "entry '{}' is not callable (got {:?})",
                            self.limits.entry,
                            value.type_of()
                        ));
                    }

                    ctx.globals()
                        .set(ENTRY_SLOT, value)
                        .map_err(|e| format!("failed to keep entry: {e}"))
                })
            })
            .map_err(StreamError::Sandbox)?;

        Ok(SigningFunction {
            context,
            _runtime: runtime,
            budget,
        })
    }
}

/**
    A vendor signing routine living inside its own sandbox.

    Calls are serialized on the interpreter's lock; the value is safe to
    share between tasks.
*/
pub struct SigningFunction {
    context: Context,
    _runtime: Runtime,
    budget: CpuBudget,
}

impl SigningFunction {
    /**
        Produce a signature for one stream request.

        The vendor routine must return a string; it is parsed as a
        URL-encoded query into a [`SignaturePayload`].
    */
    pub fn sign(
        &self,
        address: &RoomAddress,
        device_id: &DeviceId,
        timestamp: i64,
    ) -> StreamResult<SignaturePayload> {
        let args = (
            address.as_str().to_string(),
            device_id.as_str().to_string(),
            timestamp as f64,
        );

        let output = self
            .context
            .with(|ctx| {
                self.budget.run(|| {
                    let entry: Function = ctx
                        .globals()
                        .get(ENTRY_SLOT)
                        .map_err(|e| format!("entry missing: {e}"))?;
                    let value: Value = entry
                        .call(args)
                        .catch(&ctx)
                        .map_err(|e| format!("signing call failed: {e}"))?;
                    match value.as_string() {
                        Some(s) => s.to_string().map_err(|e| e.to_string()),
                        None => Err(format!(
                            "signing call returned {:?}, expected a string",
                            value.type_of()
                        )),
                    }
                })
            })
            .map_err(StreamError::Sandbox)?;

        Ok(SignaturePayload::parse(&output))
    }
}

impl std::fmt::Debug for SigningFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningFunction").finish_non_exhaustive()
    }
}

// ── Globals ──────────────────────────────────────────────────────────────────

fn install_globals(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let crypto = Object::new(ctx.clone())?;
    crypto.set(
        "MD5",
        Function::new(ctx.clone(), |text: Coerced<String>| md5_hex(&text.0))?,
    )?;
    globals.set("CryptoJS", crypto)?;

    globals.set("window", sentinel_object(ctx, NATIVE_CODE_SENTINEL)?)?;
    globals.set("document", sentinel_object(ctx, NATIVE_CODE_SENTINEL)?)?;

    Ok(())
}

/// Vendor scripts are written for non-strict browser globals.
fn sloppy_script() -> EvalOptions {
    let mut options = EvalOptions::default();
    options.global = true;
    options.strict = false;
    options
}

/// An object where every property read yields `sentinel`.
fn sentinel_object<'js>(ctx: &Ctx<'js>, sentinel: &str) -> rquickjs::Result<Value<'js>> {
    let factory: Function = ctx.eval(SENTINEL_FACTORY)?;
    factory.call((sentinel.to_string(),))
}

fn md5_hex(text: &str) -> String {
    hex::encode(Md5::digest(text.as_bytes()))
}

fn sandbox_error(e: rquickjs::Error) -> StreamError {
    StreamError::Sandbox(e.to_string())
}

// ── CPU budget ───────────────────────────────────────────────────────────────

/**
    Deadline checked by the interpreter's interrupt handler.

    [`run`](Self::run) must only be entered while holding the context lock.
    Calls into one runtime never overlap then, so a single slot is enough.
*/
struct CpuBudget {
    budget: Duration,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl CpuBudget {
    fn new(budget: Duration) -> Self {
        Self {
            budget,
            deadline: Arc::new(Mutex::new(None)),
        }
    }

    fn interrupt_handler(&self) -> Box<dyn FnMut() -> bool + Send + 'static> {
        let deadline = Arc::clone(&self.deadline);
        Box::new(move || deadline.lock().is_some_and(|d| Instant::now() >= d))
    }

    fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        let _armed = Armed::new(&self.deadline, self.budget);
        f()
    }
}

/// Clears the deadline on drop, even if the guarded call unwinds.
struct Armed<'a> {
    deadline: &'a Mutex<Option<Instant>>,
}

impl<'a> Armed<'a> {
    fn new(deadline: &'a Mutex<Option<Instant>>, budget: Duration) -> Self {
        *deadline.lock() = Some(Instant::now() + budget);
        Self { deadline }
    }
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        *self.deadline.lock() = None;
    }
}
