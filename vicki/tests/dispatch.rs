//! Rank and pass ordering, handler isolation and the engine surface.

mod common;

use common::{engine, metablock, spoken};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vicki::vicki_script::{MetablockError, Request, StructuredCondition};
use vicki::{DispatchOutcome, HandlerContext, Route, ScriptSource, VickiError};

/// Script answering `pattern`; counts invocations and only claims the turn
/// when `answers` is set.
fn counting(name: &str, pattern: &'static str, hits: Arc<AtomicUsize>, answers: bool) -> ScriptSource {
    let reply = format!("{} here", name);
    ScriptSource::new(metablock(name, &[]), move |vs| {
        let hits = hits.clone();
        let reply = reply.clone();
        vs.listen(pattern, move |mut ctx| {
            let hits = hits.clone();
            let reply = reply.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                if answers {
                    ctx.response.say(reply)?.send()?;
                }
                Ok(())
            }
        });
        Ok(())
    })
}

fn counters(n: usize) -> Vec<Arc<AtomicUsize>> {
    (0..n).map(|_| Arc::new(AtomicUsize::new(0))).collect()
}

fn counts(hits: &[Arc<AtomicUsize>]) -> Vec<usize> {
    hits.iter().map(|h| h.load(Ordering::SeqCst)).collect()
}

#[tokio::test]
async fn test_first_rank_that_sends_wins() {
    let engine = engine();
    let hits = counters(3);
    for (i, name) in ["first", "second", "third"].iter().enumerate() {
        engine
            .load(counting(name, "^status$", hits[i].clone(), true))
            .await
            .unwrap();
    }

    let outcome = engine.handle(Request::new("status", "s1")).await.unwrap();
    assert_eq!(outcome.script_id(), Some("first"));
    assert_eq!(spoken(&outcome).as_deref(), Some("first here"));
    assert_eq!(counts(&hits), vec![1, 0, 0]);
}

#[tokio::test]
async fn test_declining_handler_passes_to_next_rank() {
    let engine = engine();
    let hits = counters(3);
    engine.load(counting("quiet", "^status$", hits[0].clone(), false)).await.unwrap();
    engine.load(counting("loud", "^status$", hits[1].clone(), true)).await.unwrap();
    engine.load(counting("late", "^status$", hits[2].clone(), true)).await.unwrap();

    let outcome = engine.handle(Request::new("Status", "s1")).await.unwrap();
    assert_eq!(outcome.script_id(), Some("loud"));
    assert_eq!(counts(&hits), vec![1, 1, 0]);
}

#[tokio::test]
async fn test_explicit_rank_goes_first() {
    let engine = engine();
    let hits = counters(2);
    engine.load(counting("b", "^status$", hits[0].clone(), true)).await.unwrap();
    engine
        .load_with_rank(counting("a", "^status$", hits[1].clone(), true), 0)
        .await
        .unwrap();

    let ranks: Vec<(String, u32)> = engine
        .scripts()
        .await
        .iter()
        .map(|s| (s.id().to_string(), s.rank()))
        .collect();
    assert_eq!(ranks, vec![("a".to_string(), 0), ("b".to_string(), 1)]);

    let outcome = engine.handle(Request::new("status", "s1")).await.unwrap();
    assert_eq!(outcome.script_id(), Some("a"));
}

async fn echo_capture(mut ctx: HandlerContext) -> anyhow::Result<()> {
    let heard = ctx.matched.get(1).unwrap_or(ctx.matched.full()).to_string();
    ctx.vs.console().debug(format!("heard {}", heard));
    ctx.response.say(heard)?.send()?;
    Ok(())
}

#[tokio::test]
async fn test_later_pass_matches_looser_pattern() {
    let engine = engine();
    engine
        .load(ScriptSource::new(metablock("hello", &[]), |vs| {
            vs.listen(["^hello world$", "^hello$"], echo_capture);
            Ok(())
        }))
        .await
        .unwrap();

    let outcome = engine.handle(Request::new("hello world", "s1")).await.unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Handled {
            script_id: "hello".to_string(),
            route: Route::Dispatch { pass: 0 },
            response: outcome.response().cloned().unwrap(),
        }
    );

    let outcome = engine.handle(Request::new("hello", "s2")).await.unwrap();
    assert!(matches!(
        outcome,
        DispatchOutcome::Handled { route: Route::Dispatch { pass: 1 }, .. }
    ));
    assert_eq!(spoken(&outcome).as_deref(), Some("hello"));

    let outcome = engine.handle(Request::new("goodbye", "s3")).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Unhandled);
}

#[tokio::test]
async fn test_pass_zero_beats_rank() {
    let engine = engine();
    engine
        .load(ScriptSource::new(metablock("greedy", &[]), |vs| {
            vs.listen(StructuredCondition::new("^play (.*)$").pass(1), echo_capture);
            Ok(())
        }))
        .await
        .unwrap();
    engine
        .load(ScriptSource::new(metablock("music", &[]), |vs| {
            vs.listen("^play (.*)$", echo_capture);
            Ok(())
        }))
        .await
        .unwrap();

    let outcome = engine.handle(Request::new("play jazz", "s1")).await.unwrap();
    assert_eq!(outcome.script_id(), Some("music"));
    assert_eq!(spoken(&outcome).as_deref(), Some("jazz"));
}

async fn hang(_ctx: HandlerContext) -> anyhow::Result<()> {
    futures::future::pending::<()>().await;
    Ok(())
}

async fn fail(_ctx: HandlerContext) -> anyhow::Result<()> {
    anyhow::bail!("lookup failed")
}

async fn explode(_ctx: HandlerContext) -> anyhow::Result<()> {
    panic!("handler bug")
}

#[tokio::test(start_paused = true)]
async fn test_hanging_handler_times_out_and_next_rank_runs() {
    let engine = engine();
    engine
        .load(ScriptSource::new(metablock("stuck", &[]), |vs| {
            vs.listen("^status$", hang);
            Ok(())
        }))
        .await
        .unwrap();
    let hits = counters(1);
    engine.load(counting("fine", "^status$", hits[0].clone(), true)).await.unwrap();

    let outcome = engine.handle(Request::new("status", "s1")).await.unwrap();
    assert_eq!(outcome.script_id(), Some("fine"));

    // The abandoned handler was aborted.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let status = engine.status("stuck").await.unwrap();
    assert_eq!(status.in_flight(), 0);
}

#[tokio::test]
async fn test_failing_and_panicking_handlers_are_isolated() {
    let engine = engine();
    engine
        .load(ScriptSource::new(metablock("broken", &[]), |vs| {
            vs.listen("^status$", fail);
            vs.listen("^ping$", |mut ctx| async move {
                ctx.response.say("pong")?.send()?;
                Ok(())
            });
            Ok(())
        }))
        .await
        .unwrap();
    engine
        .load(ScriptSource::new(metablock("panicky", &[]), |vs| {
            vs.listen("^status$", explode);
            Ok(())
        }))
        .await
        .unwrap();
    let hits = counters(1);
    engine.load(counting("steady", "^status$", hits[0].clone(), true)).await.unwrap();

    let outcome = engine.handle(Request::new("status", "s1")).await.unwrap();
    assert_eq!(outcome.script_id(), Some("steady"));

    // Both sandboxes keep serving.
    let outcome = engine.handle(Request::new("ping", "s2")).await.unwrap();
    assert_eq!(spoken(&outcome).as_deref(), Some("pong"));
    assert!(engine.status("panicky").await.is_ok());
}

#[tokio::test]
async fn test_script_without_name_is_not_loaded() {
    let engine = engine();
    let err = engine
        .load(ScriptSource::new(
            "// ==VickiScript==\n// @description no name\n// ==/VickiScript==\n",
            |_| Ok(()),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, VickiError::Metablock(MetablockError::MissingName)));
    assert!(engine.scripts().await.is_empty());
}

#[tokio::test]
async fn test_engine_precondition_filters_requests() {
    let engine = engine();
    let hits = counters(1);
    engine.load(counting("any", "status", hits[0].clone(), true)).await.unwrap();
    engine
        .add_precondition(|request| !request.utterance().contains("private"))
        .await;

    let outcome = engine.handle(Request::new("private status", "s1")).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Unhandled);
    assert_eq!(counts(&hits), vec![0]);

    let outcome = engine.handle(Request::new("status", "s1")).await.unwrap();
    assert!(outcome.is_handled());
}

#[tokio::test]
async fn test_script_precondition() {
    let engine = engine();
    engine
        .load(ScriptSource::new(metablock("guarded", &[]), |vs| {
            vs.precondition(|request| request.session_id().as_str() == "allowed");
            vs.listen("^status$", echo_capture);
            Ok(())
        }))
        .await
        .unwrap();

    assert!(!engine.handle(Request::new("status", "other")).await.unwrap().is_handled());
    assert!(engine.handle(Request::new("status", "allowed")).await.unwrap().is_handled());
}

#[tokio::test]
async fn test_invoke_and_find_handler() {
    let engine = engine();
    engine
        .load(ScriptSource::new(metablock("echo", &[]), |vs| {
            vs.listen("^nothing$", echo_capture);
            vs.listen("^say (.*)$", echo_capture);
            Ok(())
        }))
        .await
        .unwrap();

    let request = Request::new("say hi", "s1");
    let matched = engine.find_handler("echo", &request).await.unwrap().unwrap();
    assert_eq!(matched.handler, 1);
    assert_eq!(matched.captures.to_vec(), vec!["say hi", "hi"]);

    let outcome = engine.invoke("echo", &request).await.unwrap();
    assert_eq!(spoken(&outcome).as_deref(), Some("hi"));

    assert!(matches!(
        engine.invoke("missing", &request).await,
        Err(VickiError::UnknownScript(_))
    ));
}

#[tokio::test]
async fn test_reset_drops_everything() {
    let engine = engine();
    let hits = counters(1);
    engine.load(counting("any", "^status$", hits[0].clone(), true)).await.unwrap();
    engine.add_precondition(|_| false).await;

    engine.reset().await;
    assert!(engine.scripts().await.is_empty());

    let hits = counters(1);
    engine.load(counting("fresh", "^status$", hits[0].clone(), true)).await.unwrap();
    let outcome = engine.handle(Request::new("status", "s1")).await.unwrap();
    assert_eq!(outcome.script_id(), Some("fresh"));
}
