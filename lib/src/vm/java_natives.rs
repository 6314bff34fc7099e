//! Natives of the built-in library classes
//!
//! These are the places where the program under test reaches into the scheduler: starting,
//! yielding, sleeping, waiting, and notifying all end the current step, and `jvmc/Verify` exposes
//! data choices and atomic sections to the program.

use super::{
    LockOutcome, NativeContext, NativeOutcome, NativeRegistry, ObjRef, SlotVec, ThreadState, Value,
    VmError,
};
use crate::jvm::{BinaryName, MethodDescriptor, UnqualifiedName};
use crate::mc::{ChoiceKind, ChoiceRequest, ChoiceValue, SchedulingPoint};

type NativeResult = Result<NativeOutcome, VmError>;

pub(super) fn register(registry: &mut NativeRegistry) {
    registry.register("java/lang/Object", "wait", "()V", object_wait);
    registry.register("java/lang/Object", "wait", "(J)V", object_timed_wait);
    registry.register("java/lang/Object", "notify", "()V", object_notify);
    registry.register("java/lang/Object", "notifyAll", "()V", object_notify_all);
    registry.register("java/lang/Object", "hashCode", "()I", object_hash_code);

    registry.register("java/lang/Thread", "start", "()V", thread_start);
    registry.register("java/lang/Thread", "isAlive", "()Z", thread_is_alive);
    registry.register("java/lang/Thread", "interrupt", "()V", thread_interrupt);
    registry.register("java/lang/Thread", "isInterrupted", "()Z", thread_is_interrupted);
    registry.register("java/lang/Thread", "yield", "()V", thread_yield);
    registry.register("java/lang/Thread", "sleep", "(J)V", thread_sleep);
    registry.register(
        "java/lang/Thread",
        "currentThread",
        "()Ljava/lang/Thread;",
        thread_current_thread,
    );

    registry.register("java/lang/System", "gc", "()V", system_gc);

    registry.register("jvmc/Verify", "getInt", "(II)I", verify_get_int);
    registry.register("jvmc/Verify", "getBoolean", "()Z", verify_get_boolean);
    registry.register("jvmc/Verify", "beginAtomic", "()V", verify_begin_atomic);
    registry.register("jvmc/Verify", "endAtomic", "()V", verify_end_atomic);
    registry.register("jvmc/Verify", "ignoreIf", "(Z)V", verify_ignore_if);
}

fn receiver(args: &[Value]) -> Result<ObjRef, VmError> {
    match args.first() {
        Some(Value::Ref(Some(object))) => Ok(*object),
        other => Err(VmError::BadOperand(format!("bad receiver {:?}", other))),
    }
}

fn int_arg(args: &[Value], idx: usize) -> Result<i32, VmError> {
    args.get(idx)
        .and_then(|arg| arg.as_int())
        .ok_or_else(|| VmError::BadOperand(format!("argument {} is not an int", idx)))
}

fn not_owner() -> NativeOutcome {
    NativeOutcome::Throw(
        BinaryName::ILLEGALMONITORSTATEEXCEPTION,
        Some(String::from("current thread is not owner")),
    )
}

/// Clear the interrupt flag of the calling thread, returning whether it was set
fn take_interrupt(ctx: &mut NativeContext<'_>) -> Result<bool, VmError> {
    let info = ctx.kernel.thread_mut(ctx.thread())?;
    Ok(std::mem::replace(&mut info.interrupted, false))
}

fn object_wait(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    wait(ctx, args, false)
}

fn object_timed_wait(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    wait(ctx, args, true)
}

/// `wait()` runs twice: once to release the monitor, and once more (after being notified,
/// interrupted, or timed out, and scheduled) to reacquire it
fn wait(ctx: &mut NativeContext<'_>, args: &[Value], timed: bool) -> NativeResult {
    let object = receiver(args)?;
    let thread = ctx.thread();
    let info = ctx.kernel.thread(thread)?;
    let resuming = info.blocked_on == Some(object)
        && matches!(
            info.state,
            ThreadState::Notified | ThreadState::Interrupted | ThreadState::TimeoutWaiting
        );

    if resuming {
        if ctx.kernel.end_wait(thread, object)? == LockOutcome::Blocked {
            return Ok(NativeOutcome::Blocked);
        }
        if take_interrupt(ctx)? {
            return Ok(NativeOutcome::Throw(BinaryName::INTERRUPTEDEXCEPTION, None));
        }
        return Ok(NativeOutcome::Return(None));
    }

    if !ctx.kernel.owns_monitor(thread, object)? {
        return Ok(not_owner());
    }
    if take_interrupt(ctx)? {
        return Ok(NativeOutcome::Throw(BinaryName::INTERRUPTEDEXCEPTION, None));
    }
    ctx.kernel.wait(thread, object, timed)?;
    Ok(NativeOutcome::Blocked)
}

fn object_notify(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let object = receiver(args)?;
    let thread = ctx.thread();
    if !ctx.kernel.owns_monitor(thread, object)? {
        return Ok(not_owner());
    }
    let waiters = ctx.kernel.waiters(object)?;
    let waiter = match waiters.as_slice() {
        [] => return Ok(NativeOutcome::Return(None)),
        [waiter] => *waiter,
        _ => match ctx.current_choice(ChoiceKind::Notify) {
            Some(ChoiceValue::Thread(waiter)) => waiter,
            _ => return Ok(NativeOutcome::Choice(ChoiceRequest::Notify(waiters))),
        },
    };
    ctx.kernel.notify_thread(Some(thread), object, waiter)?;
    Ok(NativeOutcome::Return(None))
}

fn object_notify_all(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let object = receiver(args)?;
    let thread = ctx.thread();
    if !ctx.kernel.owns_monitor(thread, object)? {
        return Ok(not_owner());
    }
    ctx.kernel.notify_all(Some(thread), object)?;
    Ok(NativeOutcome::Return(None))
}

fn object_hash_code(_ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let object = receiver(args)?;
    Ok(NativeOutcome::Return(Some(Value::Int(object.0 as i32))))
}

/// Make the thread runnable with its `run()` method as the bottom frame, then let the scheduler
/// decide who goes first
fn thread_start(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let object = receiver(args)?;
    if ctx.take_call_done()? {
        return Ok(NativeOutcome::Return(None));
    }
    let started = match ctx.kernel.thread_for_object(object) {
        Some(started) => started,
        None => ctx.kernel.add_thread(object),
    };
    if ctx.kernel.thread(started)?.state != ThreadState::New {
        return Ok(NativeOutcome::Throw(
            BinaryName::ILLEGALTHREADSTATEEXCEPTION,
            None,
        ));
    }

    let class = ctx.kernel.heap.get(object)?.class;
    let run_descriptor = MethodDescriptor {
        parameters: vec![],
        return_type: None,
    };
    let run = match ctx.db.dispatch(class, &UnqualifiedName::RUN, &run_descriptor) {
        Some(run) => run,
        None => {
            return Ok(NativeOutcome::Throw(
                BinaryName::ABSTRACTMETHODERROR,
                Some(String::from("run()V")),
            ))
        }
    };
    let mut run_args = SlotVec::new();
    run_args.push_word(ObjRef::to_word(Some(object)), true);
    ctx.push_direct_call(started, run, run_args)?;
    ctx.kernel.set_thread_state(started, ThreadState::Runnable)?;
    ctx.mark_call_done()?;
    log::debug!("{} starts {}", ctx.thread(), started);
    Ok(NativeOutcome::Choice(ChoiceRequest::Threads(
        SchedulingPoint::Start,
    )))
}

fn thread_is_alive(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let object = receiver(args)?;
    let alive = match ctx.kernel.thread_for_object(object) {
        Some(thread) => ctx.kernel.thread(thread)?.is_alive(),
        None => false,
    };
    Ok(NativeOutcome::Return(Some(Value::Int(alive as i32))))
}

fn thread_interrupt(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let object = receiver(args)?;
    if let Some(thread) = ctx.kernel.thread_for_object(object) {
        ctx.kernel.interrupt(thread)?;
    }
    Ok(NativeOutcome::Return(None))
}

fn thread_is_interrupted(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let object = receiver(args)?;
    let interrupted = match ctx.kernel.thread_for_object(object) {
        Some(thread) => ctx.kernel.thread(thread)?.interrupted,
        None => false,
    };
    Ok(NativeOutcome::Return(Some(Value::Int(interrupted as i32))))
}

fn thread_yield(ctx: &mut NativeContext<'_>, _args: &[Value]) -> NativeResult {
    if ctx.first_step() {
        Ok(NativeOutcome::Return(None))
    } else {
        Ok(NativeOutcome::Choice(ChoiceRequest::Threads(
            SchedulingPoint::Yield,
        )))
    }
}

/// There is no clock: sleeping is a scheduling point, and the sleeper stays schedulable
fn thread_sleep(ctx: &mut NativeContext<'_>, _args: &[Value]) -> NativeResult {
    let thread = ctx.thread();
    if ctx.first_step() && ctx.kernel.thread(thread)?.state == ThreadState::Sleeping {
        ctx.kernel.set_thread_state(thread, ThreadState::Runnable)?;
        if take_interrupt(ctx)? {
            return Ok(NativeOutcome::Throw(BinaryName::INTERRUPTEDEXCEPTION, None));
        }
        return Ok(NativeOutcome::Return(None));
    }
    if take_interrupt(ctx)? {
        return Ok(NativeOutcome::Throw(BinaryName::INTERRUPTEDEXCEPTION, None));
    }
    ctx.kernel.set_thread_state(thread, ThreadState::Sleeping)?;
    Ok(NativeOutcome::Choice(ChoiceRequest::Threads(
        SchedulingPoint::Sleep,
    )))
}

fn thread_current_thread(ctx: &mut NativeContext<'_>, _args: &[Value]) -> NativeResult {
    let thread_object = ctx.kernel.thread(ctx.thread())?.thread_object;
    Ok(NativeOutcome::Return(Some(Value::Ref(Some(thread_object)))))
}

fn system_gc(ctx: &mut NativeContext<'_>, _args: &[Value]) -> NativeResult {
    let collected = ctx.collect_garbage()?;
    log::debug!("System.gc() collected {} objects", collected);
    Ok(NativeOutcome::Return(None))
}

fn verify_get_int(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let low = int_arg(args, 0)?;
    let high = int_arg(args, 1)?;
    if low > high {
        return Ok(NativeOutcome::Throw(
            BinaryName::RUNTIMEEXCEPTION,
            Some(format!("empty range [{}, {}]", low, high)),
        ));
    }
    if low == high {
        return Ok(NativeOutcome::Return(Some(Value::Int(low))));
    }
    match ctx.current_choice(ChoiceKind::Ints) {
        Some(ChoiceValue::Int(value)) => {
            ctx.set_return_attr(format!("Verify.getInt={}", value).into());
            Ok(NativeOutcome::Return(Some(Value::Int(value))))
        }
        _ => Ok(NativeOutcome::Choice(ChoiceRequest::Ints(
            (low..=high).collect(),
        ))),
    }
}

fn verify_get_boolean(ctx: &mut NativeContext<'_>, _args: &[Value]) -> NativeResult {
    match ctx.current_choice(ChoiceKind::Bools) {
        Some(ChoiceValue::Bool(value)) => Ok(NativeOutcome::Return(Some(Value::Int(value as i32)))),
        _ => Ok(NativeOutcome::Choice(ChoiceRequest::Bools)),
    }
}

fn verify_begin_atomic(ctx: &mut NativeContext<'_>, _args: &[Value]) -> NativeResult {
    ctx.begin_atomic();
    Ok(NativeOutcome::Return(None))
}

fn verify_end_atomic(ctx: &mut NativeContext<'_>, _args: &[Value]) -> NativeResult {
    if !ctx.end_atomic() {
        log::warn!("{} ends an atomic section it never began", ctx.thread());
    }
    Ok(NativeOutcome::Return(None))
}

fn verify_ignore_if(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    if int_arg(args, 0)? != 0 {
        ctx.set_ignored();
    }
    Ok(NativeOutcome::Return(None))
}
