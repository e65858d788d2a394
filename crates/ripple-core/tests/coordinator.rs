// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs, clippy::expect_used, clippy::unwrap_used)]
mod common;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::anyhow;
use common::{c, Page};
use ripple_core::coordinator::GENERIC_ERROR_MESSAGE;
use ripple_core::{
    Completion, ContractViolation, CoordinatorOptions, FlushCoordinator, Phase, StreamError,
    StreamEvent, Termination,
};
use ripple_proto::FramingToken;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

const PAGE: &str = "<!--c:0--><main><!--c:1--><section><!--c:2--><p></p><!--/c:2--></section>\
<!--/c:1--><!--c:3--><aside></aside><!--/c:3--></main><!--/c:0-->";

fn armed(token: &str, verbose: bool) -> FlushCoordinator {
    let mut coordinator = FlushCoordinator::new(CoordinatorOptions {
        verbose_diagnostics: verbose,
    });
    coordinator
        .arm(Some(FramingToken::new(token)))
        .expect("arm");
    coordinator
}

fn events(list: Vec<StreamEvent>) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(list.len().max(1));
    for event in list {
        tx.try_send(event).expect("channel has room");
    }
    rx
}

/// Accepts `budget` bytes, then fails every write.
struct BrokenPipe {
    budget: usize,
}

impl AsyncWrite for BrokenPipe {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.budget == 0 {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        let n = buf.len().min(self.budget);
        self.budget -= n;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn page_then_one_frame_per_batch() {
    let page = Page::abc();
    let mut coordinator = armed("tok", false);
    let mut out = Vec::new();
    let rx = events(vec![
        StreamEvent::Batch(vec![c(2), c(1), c(3)]),
        StreamEvent::Batch(Vec::new()),
        StreamEvent::Finished(Completion::Completed),
    ]);

    let termination = coordinator
        .begin_streaming(&mut out, &page, c(0), rx)
        .await
        .expect("stream");

    assert_eq!(termination, Termination::Normal);
    assert_eq!(coordinator.phase(), Phase::Terminated(Termination::Normal));
    let text = String::from_utf8(out).expect("utf8");
    let expected = format!(
        "<!--ripple-frame:tok-->{PAGE}\
         <update-block><template component=\"1\"><section><!--c:2--><p></p><!--/c:2--></section></template>\
         <template component=\"3\"><aside></aside></template><update-block><!--ripple-frame:tok-->"
    );
    assert_eq!(text, expected);
}

#[tokio::test]
async fn unframed_response_has_no_framing_comments() {
    let page = Page::abc();
    let mut coordinator = armed("", false);
    let mut out = Vec::new();
    let rx = events(vec![StreamEvent::Batch(vec![c(3)])]);

    coordinator
        .begin_streaming(&mut out, &page, c(0), rx)
        .await
        .expect("stream");

    let text = String::from_utf8(out).expect("utf8");
    assert!(text.starts_with(PAGE));
    assert!(!text.contains("ripple-frame"));
    assert!(text.ends_with("<update-block>"));
}

#[tokio::test]
async fn dropped_sender_completes_normally() {
    let page = Page::abc();
    let mut coordinator = armed("tok", false);
    let (tx, rx) = mpsc::channel(1);
    drop(tx);

    let termination = coordinator
        .begin_streaming(Vec::new(), &page, c(0), rx)
        .await
        .expect("stream");
    assert_eq!(termination, Termination::Normal);
}

#[tokio::test]
async fn redirect_is_the_last_frame() {
    let page = Page::abc();
    let mut coordinator = armed("tok", false);
    let mut out = Vec::new();
    let rx = events(vec![
        StreamEvent::Batch(vec![c(3)]),
        StreamEvent::Finished(Completion::Redirect("/login?next=a&b".into())),
        StreamEvent::Batch(vec![c(1)]),
    ]);

    let termination = coordinator
        .begin_streaming(&mut out, &page, c(0), rx)
        .await
        .expect("stream");

    assert_eq!(termination, Termination::Redirect);
    assert_eq!(coordinator.phase(), Phase::Terminated(Termination::Redirect));
    let text = String::from_utf8(out).expect("utf8");
    assert_eq!(text.matches("kind=\"redirection\"").count(), 1);
    assert_eq!(text.matches("component=").count(), 1);
    assert!(text.ends_with(
        "<update-block><template kind=\"redirection\">/login?next=a&amp;b</template>\
         <update-block><!--ripple-frame:tok-->"
    ));
}

#[tokio::test]
async fn failure_sends_generic_message_by_default() {
    let page = Page::abc();
    let mut coordinator = armed("tok", false);
    let mut out = Vec::new();
    let rx = events(vec![StreamEvent::Finished(Completion::Failed(
        anyhow!("db password is hunter2").context("loading table"),
    ))]);

    let err = coordinator
        .begin_streaming(&mut out, &page, c(0), rx)
        .await
        .unwrap_err();

    assert!(matches!(err, StreamError::Render(_)));
    assert_eq!(coordinator.phase(), Phase::Terminated(Termination::Error));
    let text = String::from_utf8(out).expect("utf8");
    assert_eq!(text.matches("kind=\"error\"").count(), 1);
    assert!(text.contains(GENERIC_ERROR_MESSAGE));
    assert!(!text.contains("hunter2"));
}

#[tokio::test]
async fn verbose_failure_sends_the_error_chain() {
    let page = Page::abc();
    let mut coordinator = armed("tok", true);
    let mut out = Vec::new();
    let rx = events(vec![StreamEvent::Finished(Completion::Failed(
        anyhow!("timeout").context("loading <table>"),
    ))]);

    let err = coordinator
        .begin_streaming(&mut out, &page, c(0), rx)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "render failed after the response started: loading <table>: timeout");
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains("<template kind=\"error\">loading &lt;table&gt;: timeout</template>"));
}

#[tokio::test]
async fn second_begin_streaming_writes_nothing() {
    let page = Page::abc();
    let mut coordinator = armed("tok", false);
    coordinator
        .begin_streaming(Vec::new(), &page, c(0), events(Vec::new()))
        .await
        .expect("first stream");

    let mut second = Vec::new();
    let err = coordinator
        .begin_streaming(&mut second, &page, c(0), events(Vec::new()))
        .await
        .unwrap_err();

    assert_eq!(err.contract_violation(), Some(ContractViolation::AlreadyStreaming));
    assert!(second.is_empty());
    assert_eq!(coordinator.phase(), Phase::Terminated(Termination::Normal));
}

#[tokio::test]
async fn streaming_before_arm_is_rejected() {
    let page = Page::abc();
    let mut coordinator = FlushCoordinator::new(CoordinatorOptions::default());
    let mut out = Vec::new();

    let err = coordinator
        .begin_streaming(&mut out, &page, c(0), events(Vec::new()))
        .await
        .unwrap_err();

    assert_eq!(err.contract_violation(), Some(ContractViolation::NotArmed));
    assert!(out.is_empty());
    assert_eq!(coordinator.phase(), Phase::Unarmed);
}

#[tokio::test]
async fn transport_failure_terminates_with_error() {
    let page = Page::abc();
    let mut coordinator = armed("tok", false);
    let rx = events(vec![
        StreamEvent::Batch(vec![c(1)]),
        StreamEvent::Finished(Completion::Completed),
    ]);
    // Enough for the opener and page, not for the first batch.
    let budget = "<!--ripple-frame:tok-->".len() + PAGE.len();

    let err = coordinator
        .begin_streaming(BrokenPipe { budget }, &page, c(0), rx)
        .await
        .unwrap_err();

    assert!(matches!(err, StreamError::Transport(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    assert_eq!(coordinator.phase(), Phase::Terminated(Termination::Error));
}

#[tokio::test]
async fn batches_flow_while_the_engine_is_still_running() {
    let page = Page::abc();
    let mut coordinator = armed("tok", false);
    let (tx, rx) = mpsc::channel(1);
    let (client, mut server_side) = tokio::io::duplex(64);

    let engine = tokio::spawn(async move {
        tx.send(StreamEvent::Batch(vec![c(3)])).await.expect("send");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tx.send(StreamEvent::Batch(vec![c(2)])).await.expect("send");
        tx.send(StreamEvent::Finished(Completion::Completed))
            .await
            .expect("send");
    });
    let reader = tokio::spawn(async move {
        let mut text = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server_side, &mut text)
            .await
            .expect("read");
        text
    });

    coordinator
        .begin_streaming(client, &page, c(0), rx)
        .await
        .expect("stream");
    engine.await.expect("engine");
    let text = reader.await.expect("reader");
    assert_eq!(text.matches("<update-block>").count(), 4);
    assert!(text.contains("<template component=\"2\"><p></p></template>"));
}
