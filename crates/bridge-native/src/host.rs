//! Native command host.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use bridge_core::{CommandKind, InboundEnvelope, OutboundEnvelope};
use bridge_transport::{decode_line, encode_line};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    runtime::Handle,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_stream::{StreamExt, wrappers::LinesStream};

use crate::{HostError, NativeModule, Reply, Responder, ResponseSink};

#[derive(Default)]
struct HostInner {
    modules: RwLock<HashMap<CommandKind, Arc<dyn NativeModule>>>,
    sink: RwLock<Option<ResponseSink>>,
}

/// Routes commands from the universal side to native modules.
///
/// Cloning shares the module table and the response sink.
#[derive(Clone, Default)]
pub struct NativeHost {
    inner: Arc<HostInner>,
}

impl NativeHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve every command `module` declares.
    ///
    /// A later registration for the same command replaces the earlier one.
    pub fn register(&self, module: Arc<dyn NativeModule>) {
        let mut modules = self
            .inner
            .modules
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for kind in module.commands() {
            if modules.insert(*kind, Arc::clone(&module)).is_some() {
                tracing::info!("Replacing native module for {}", kind.name());
            }
        }
    }

    #[must_use]
    pub fn serves(&self, kind: CommandKind) -> bool {
        self.inner
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&kind)
    }

    /// Send every response produced from now on to `sink`.
    pub fn set_sink<F>(&self, sink: F)
    where
        F: Fn(InboundEnvelope) + Send + Sync + 'static,
    {
        let sink: ResponseSink = Arc::new(sink);
        *self.inner.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn sink(&self) -> Option<ResponseSink> {
        self.inner
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Execute one command on the current runtime.
    ///
    /// Returns `None` when no module serves the command; the envelope is
    /// dropped and never answered.
    ///
    /// # Errors
    /// Returns error if no sink is installed or no runtime is running.
    pub fn handle(&self, envelope: OutboundEnvelope) -> Result<Option<JoinHandle<()>>, HostError> {
        let OutboundEnvelope { task_id, command } = envelope;

        let module = self
            .inner
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&command.kind())
            .cloned();
        let Some(module) = module else {
            tracing::warn!("No native module serves {}, ignoring task {task_id}", command.name());
            return Ok(None);
        };

        let sink = self.sink().ok_or(HostError::NoSink)?;
        let runtime = Handle::try_current()?;
        let responder = Responder::new(task_id, sink);

        tracing::debug!("Executing {} for task {}", command.name(), responder.task_id());
        Ok(Some(runtime.spawn(async move {
            match module.execute(command, responder.clone()).await {
                Ok(Reply::Values(values)) => responder.ok(values),
                Ok(Reply::Sent) => {}
                Err(reason) => responder.err(reason),
            }
        })))
    }

    /// Serve commands read as JSON lines from `reader`, answering on `writer`.
    ///
    /// Replaces the response sink. Returns when `reader` reaches end of file;
    /// responses still in flight keep being written.
    ///
    /// # Errors
    /// Returns error if reading fails or a command cannot be handled.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), HostError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundEnvelope>();
        self.set_sink(move |envelope| {
            if tx.send(envelope).is_err() {
                tracing::debug!("Response writer stopped, dropping response");
            }
        });

        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(envelope) = rx.recv().await {
                let line = match encode_line(&envelope) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!("Failed to encode response for {}: {e}", envelope.task_id);
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut writer, &line).await {
                    tracing::error!("Failed to write response: {e}");
                    break;
                }
            }
        });

        let mut lines = LinesStream::new(BufReader::new(reader).lines());
        while let Some(line) = lines.next().await {
            match decode_line::<OutboundEnvelope>(&line?) {
                Ok(Some(envelope)) => {
                    self.handle(envelope)?;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Ignoring invalid command line: {e}"),
            }
        }

        tracing::debug!("Command stream closed");
        Ok(())
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_core::{Command, Response, TaskId};
    use serde_json::{Value, json};
    use std::sync::Mutex;

    struct Echo {
        label: &'static str,
    }

    #[async_trait]
    impl NativeModule for Echo {
        fn commands(&self) -> &[CommandKind] {
            &[CommandKind::MessagingConnect]
        }

        async fn execute(&self, command: Command, responder: Responder) -> Result<Reply, String> {
            responder.ok(vec![json!("progress")]);
            match command {
                Command::MessagingConnect { url, .. } if url.is_empty() => Err("no url".into()),
                Command::MessagingConnect { url, .. } if url == "self" => {
                    responder.ok(vec![json!("answered")]);
                    Ok(Reply::Sent)
                }
                Command::MessagingConnect { url, .. } => Ok(vec![json!(self.label), json!(url)].into()),
                _ => Err("unexpected".into()),
            }
        }
    }

    fn connect(task: &str, url: &str) -> OutboundEnvelope {
        OutboundEnvelope {
            task_id: TaskId::from(task),
            command: Command::MessagingConnect {
                url: url.into(),
                connection_options: "{}".into(),
            },
        }
    }

    fn collecting(host: &NativeHost) -> Arc<Mutex<Vec<InboundEnvelope>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        host.set_sink(move |envelope| sink.lock().unwrap().push(envelope));
        seen
    }

    #[tokio::test]
    async fn test_streams_then_finishes() {
        let host = NativeHost::new();
        host.register(Arc::new(Echo { label: "echo" }));
        let seen = collecting(&host);

        host.handle(connect("t1", "mqtt://a")).unwrap().unwrap().await.unwrap();
        host.handle(connect("t2", "")).unwrap().unwrap().await.unwrap();

        let seen = seen.lock().unwrap();
        let responses: Vec<(&str, &Response)> = seen
            .iter()
            .map(|e| (e.task_id.as_str(), &e.response))
            .collect();
        assert_eq!(
            responses,
            vec![
                ("t1", &Response::ok(vec![json!("progress")])),
                ("t1", &Response::ok(vec![json!("echo"), json!("mqtt://a")])),
                ("t2", &Response::ok(vec![json!("progress")])),
                ("t2", &Response::err("no url")),
            ]
        );
    }

    #[tokio::test]
    async fn test_module_answered_reply_is_not_repeated() {
        let host = NativeHost::new();
        host.register(Arc::new(Echo { label: "echo" }));
        let seen = collecting(&host);

        host.handle(connect("t1", "self")).unwrap().unwrap().await.unwrap();

        let responses: Vec<Response> = seen.lock().unwrap().iter().map(|e| e.response.clone()).collect();
        assert_eq!(
            responses,
            vec![
                Response::ok(vec![json!("progress")]),
                Response::ok(vec![json!("answered")]),
            ]
        );
    }

    #[tokio::test]
    async fn test_later_registration_wins() {
        let host = NativeHost::new();
        host.register(Arc::new(Echo { label: "first" }));
        host.register(Arc::new(Echo { label: "second" }));
        let seen = collecting(&host);

        host.handle(connect("t1", "mqtt://a")).unwrap().unwrap().await.unwrap();

        assert_eq!(seen.lock().unwrap()[1].response.args[0], json!("second"));
    }

    #[tokio::test]
    async fn test_unserved_command_is_ignored() {
        let host = NativeHost::new();
        let seen = collecting(&host);

        assert!(host.handle(connect("t1", "mqtt://a")).unwrap().is_none());
        assert!(!host.serves(CommandKind::MessagingConnect));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handle_requires_sink_and_runtime() {
        let host = NativeHost::new();
        host.register(Arc::new(Echo { label: "echo" }));

        assert!(matches!(host.handle(connect("t1", "u")), Err(HostError::NoSink)));

        host.set_sink(|_| {});
        assert!(matches!(host.handle(connect("t1", "u")), Err(HostError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_serve_answers_lines() {
        let host = NativeHost::new();
        host.register(Arc::new(Echo { label: "echo" }));

        let (mut commands, host_in) = tokio::io::duplex(1024);
        let (host_out, responses) = tokio::io::duplex(1024);
        let serving = tokio::spawn({
            let host = host.clone();
            async move { host.serve(host_in, host_out).await }
        });

        commands
            .write_all(b"not json\n\n[\"t1\",\"messaging_connect\",[\"mqtt://a\",\"{}\"]]\n")
            .await
            .unwrap();
        drop(commands);
        serving.await.unwrap().unwrap();

        let mut lines = BufReader::new(responses).lines();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"["t1",[null,"progress"]]"#
        );
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"["t1",[null,"echo","mqtt://a"]]"#
        );
    }
}
