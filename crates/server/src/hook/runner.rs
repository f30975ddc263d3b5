//! The chain runner: dispatches the hooks of one phase against one request.
//!
//! The runner is a loop over a cursor, the position of the last dispatched hook. The next hook
//! is looked up at dispatch time among the registered hooks and the one-time hooks of the
//! request, so a one-time hook added by a running handler is still dispatched at its position.
//! A one-time hook whose position is already behind the cursor is overdue and runs next; the
//! cursor stays where it is.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use sans_http::event::Category;
use sans_http::protocol::SharedError;

use crate::hook::{Handler, Hook, Order, Phase};
use crate::{PanicError, RequestContext};

#[derive(Debug)]
pub(crate) enum Outcome {
    /// every hook was visited and no error is left in flight
    Completed,
    /// the response was sent by a hook of this run
    Sent,
    /// an error is still in flight
    Failed(SharedError),
}

type Position = (i32, u64);

pub(crate) async fn run(ctx: &mut RequestContext, phase: Phase) -> Outcome {
    let events = ctx.events().clone();
    let order = ctx.registry.order(phase).unwrap_or(Order::Ascending);
    let stop_on_send = !ctx.response().is_sent();

    let mut cursor: Option<Position> = None;
    let mut error: Option<SharedError> = None;

    while let Some(hook) = next_hook(ctx, phase, order, cursor) {
        if follows(order, hook.position(), cursor) {
            cursor = Some(hook.position());
        }
        let name = hook.name();

        let call = match (hook.handler(), error.clone()) {
            (Handler::Normal(middleware), None) => middleware.call(ctx),
            (Handler::Error(middleware), Some(in_flight)) => middleware.call(in_flight, ctx),
            (handler, _) => {
                let negation = if handler.is_error_handling() { "" } else { "not " };
                events.debug(Category::Hook, format!("skip {name}: handler is {negation}error handling"));
                continue;
            }
        };

        events.debug(Category::Hook, format!("start {name}"));
        let started = Instant::now();

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => {
                if error.take().is_some() {
                    events.info(Category::Hook, format!("{name} handled the error"));
                }
            }
            Ok(Err(e)) => {
                let e: SharedError = Arc::from(e);
                events.warn(Category::Hook, format!("{name} failed: {e}"));
                error = Some(e);
            }
            Err(payload) => {
                let e = PanicError::from_payload(&*payload);
                events.error(Category::Hook, format!("{name} {e}"));
                error = Some(Arc::new(e));
            }
        }

        events.debug(Category::Hook, format!("end {name} after {:?}", started.elapsed()));

        if stop_on_send && ctx.response().is_sent() {
            if let Some(error) = error {
                ctx.response().report_error_after_send(name, &error);
            }
            return Outcome::Sent;
        }
    }

    error.map_or(Outcome::Completed, Outcome::Failed)
}

/// True when `position` comes after `cursor` in `order`.
fn follows(order: Order, position: Position, cursor: Option<Position>) -> bool {
    match (order, cursor) {
        (_, None) => true,
        (Order::Ascending, Some(cursor)) => position > cursor,
        (Order::Stack, Some(cursor)) => position < cursor,
    }
}

fn precedes(order: Order, a: Position, b: Position) -> bool {
    match order {
        Order::Ascending => a < b,
        Order::Stack => a > b,
    }
}

/// Picks the hook to dispatch after `cursor`, taking one-time hooks out of the context.
///
/// Overdue one-time hooks come first, then whichever of the registered and the pending
/// one-time hooks follows the cursor most closely.
fn next_hook(ctx: &mut RequestContext, phase: Phase, order: Order, cursor: Option<Position>) -> Option<Hook> {
    let earliest = |best: (usize, Position), candidate: (usize, Position)| {
        if precedes(order, candidate.1, best.1) { candidate } else { best }
    };
    let pending = |due: bool| {
        ctx.once
            .iter()
            .enumerate()
            .filter(|(_, (hook_phase, hook))| *hook_phase == phase && follows(order, hook.position(), cursor) != due)
            .map(|(index, (_, hook))| (index, hook.position()))
            .reduce(earliest)
    };

    if let Some((index, _)) = pending(true) {
        let (_, hook) = ctx.once.remove(index);
        ctx.events().debug(Category::Hook, format!("{} is overdue", hook.name()));
        return Some(hook);
    }
    let once = pending(false);

    let hooks = ctx.registry.hooks(phase);
    let registered = match order {
        Order::Ascending => hooks.iter().find(|hook| follows(order, hook.position(), cursor)),
        Order::Stack => hooks.iter().rev().find(|hook| follows(order, hook.position(), cursor)),
    };

    match (registered, once) {
        (Some(hook), Some((_, position))) if precedes(order, hook.position(), position) => Some(hook.clone()),
        (_, Some((index, _))) => Some(ctx.once.remove(index).1),
        (hook, None) => hook.cloned(),
    }
}
