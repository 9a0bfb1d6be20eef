use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task;
use tracing::{debug, info, trace};
use wirb::env::SandboxEnv;
use wirb::reader::Reader;
use wirb::{Context, Evaluator, PromptMode, WirbErr};

use crate::capture::{captured, Workspace};
use crate::error::SessionError;
use crate::hooks::{CurrentSession, EndGuard, SessionHooks, SessionInfo, SessionSetup};
use crate::input::{Gets, InputAdapter, DEFAULT_CHUNK};
use crate::output::OutputAdapter;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub irb_name: String,
    pub prompt_mode: PromptMode,
    pub read_chunk: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            irb_name: String::from("wirb"),
            prompt_mode: PromptMode::Default,
            read_chunk: DEFAULT_CHUNK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Starting,
    Prompting,
    Reading,
    Evaluating,
    Emitting,
    Closing,
}

/// One client connection driving its own REPL.
pub struct Session<R, W> {
    info: SessionInfo,
    input: InputAdapter<R>,
    output: OutputAdapter<W>,
    evaluator: Evaluator<SandboxEnv>,
    reader: Reader,
    context: Context,
    state: State,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, info: SessionInfo, options: &SessionOptions) -> Session<R, W> {
        let output = OutputAdapter::new(writer);

        let mut env = SandboxEnv::default();
        wirb_core::load(&mut env);
        let evaluator = Evaluator::new(env, Box::new(Workspace::new(output.outbox())));

        let mut context = Context::new(&options.irb_name, options.prompt_mode);
        context.main = evaluator.main().to_s();

        Session {
            info,
            input: InputAdapter::with_chunk_size(reader, options.read_chunk),
            output,
            evaluator,
            reader: Reader::new(),
            context,
            state: State::Starting,
        }
    }

    fn enter(&mut self, state: State) {
        trace!(from = ?self.state, to = ?state, "session state");
        self.state = state;
    }

    /// Runs the session to completion. `session_ended` fires exactly once,
    /// also when the returned future is dropped midway.
    pub async fn run(
        mut self,
        hooks: Arc<dyn SessionHooks>,
        current: Option<CurrentSession>,
    ) -> Result<(), SessionError> {
        let _ended = EndGuard {
            hooks: hooks.clone(),
            info: self.info.clone(),
        };
        if let Some(current) = current {
            current.set(self.info.clone());
        }
        info!("session started");

        let res = match self.start(hooks.as_ref()).await {
            Ok(()) => self.repl().await,
            Err(err) => Err(err),
        };

        self.enter(State::Closing);
        self.output.flush().await;
        self.output.close().await;
        info!(
            lines = self.input.line_count(),
            peer_gone = self.output.is_broken(),
            "session closed"
        );
        res
    }

    async fn start(&mut self, hooks: &dyn SessionHooks) -> Result<(), SessionError> {
        let outbox = self.output.outbox();
        let mut setup = SessionSetup {
            info: &self.info,
            evaluator: &mut self.evaluator,
            context: &mut self.context,
        };
        let configured = task::block_in_place(|| captured(&outbox, || hooks.configure(&mut setup)))?;

        if let Err(err) = configured {
            self.output.write(&format!("session setup failed: {}\n", err)).await;
            return Err(SessionError::Hook(err));
        }
        Ok(())
    }

    async fn repl(&mut self) -> Result<(), SessionError> {
        loop {
            self.enter(State::Prompting);
            let line_no = self.input.line_count() + 1;
            let prompt = self.context.prompt(self.reader.state(), line_no, self.reader.indent());

            self.enter(State::Reading);
            let mut gets = self.input.gets(&prompt, &mut self.output).await;
            // The rest of a line is read without prompting again.
            while gets == Gets::Partial {
                gets = self.input.gets("", &mut self.output).await;
            }
            let line = match gets {
                Gets::Line(line) => line,
                Gets::Eof | Gets::Partial => {
                    debug!("end of input");
                    return Ok(());
                }
            };

            let stmt = match self.reader.push_line(&line, line_no) {
                Ok(Some(stmt)) => stmt,
                Ok(None) => continue,
                Err(err) => {
                    self.report(&err, line_no);
                    self.output.flush().await;
                    continue;
                }
            };

            self.enter(State::Evaluating);
            let outbox = self.output.outbox();
            let evaluator = &mut self.evaluator;
            let evaluated = task::block_in_place(|| captured(&outbox, || evaluator.eval(&stmt)))?;

            self.enter(State::Emitting);
            match evaluated {
                Ok(val) => self.context.echo(&mut self.output.outbox(), &val),
                Err(WirbErr::Exit) => {
                    debug!("exit requested");
                    return Ok(());
                }
                Err(err) => self.report(&err, stmt.line),
            }
            self.output.flush().await;
        }
    }

    fn report(&self, err: &WirbErr, line: usize) {
        let source = self.input.line(line).ok();
        self.context.report(&mut self.output.outbox(), err, line, source.as_deref());
    }
}
