use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::Child;
use tokio::time::Instant;

use crate::uci::{parse_uci_message, UciError, UciMessage};
use crate::{
    AnalysisEngine, EngineError, EngineEvaluation, EngineFactory, EngineInfo, EngineOptions,
    PvLine, SearchLimits,
};

type EngineReader = Box<dyn AsyncRead + Send + Unpin>;
type EngineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Bounded waits for protocol round-trips other than searches.
#[derive(Debug, Clone, Copy)]
pub struct WorkerTimeouts {
    /// `uci` -> `uciok`
    pub handshake: Duration,
    /// `isready` -> `readyok`
    pub ready: Duration,
    /// `quit` -> process exit, before the process is killed
    pub shutdown: Duration,
}

impl Default for WorkerTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            ready: Duration::from_secs(10),
            shutdown: Duration::from_secs(1),
        }
    }
}

/// One UCI engine subprocess with strict single-command-in-flight use.
pub struct UciWorker {
    id: usize,
    process: Option<Child>,
    stdin: EngineWriter,
    stdout: Lines<BufReader<EngineReader>>,
    timeouts: WorkerTimeouts,
    engine_name: Option<String>,
    multipv: u32,
    dead: bool,
}

impl UciWorker {
    /// Spawn an engine process and complete the `uci` handshake.
    #[tracing::instrument(level = "info", skip(timeouts))]
    pub async fn spawn(id: usize, path: &Path, timeouts: WorkerTimeouts) -> Result<Self, EngineError> {
        tracing::debug!("Spawning engine process");
        let mut process = tokio::process::Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!("Failed to spawn engine: {}", e);
                EngineError::Unavailable(format!("failed to spawn {}: {}", path.display(), e))
            })?;

        let stdin = process.stdin.take().ok_or(UciError::NoStdin)?;
        let stdout = process.stdout.take().ok_or(UciError::NoStdout)?;

        let mut worker = Self::new(id, Box::new(stdout), Box::new(stdin), timeouts);
        worker.process = Some(process);
        worker.handshake().await?;
        Ok(worker)
    }

    /// Drive an engine over arbitrary streams (in-process engines, pipes in tests).
    pub async fn from_streams<R, W>(
        id: usize,
        reader: R,
        writer: W,
        timeouts: WorkerTimeouts,
    ) -> Result<Self, EngineError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut worker = Self::new(id, Box::new(reader), Box::new(writer), timeouts);
        worker.handshake().await?;
        Ok(worker)
    }

    fn new(id: usize, reader: EngineReader, writer: EngineWriter, timeouts: WorkerTimeouts) -> Self {
        Self {
            id,
            process: None,
            stdin: writer,
            stdout: BufReader::new(reader).lines(),
            timeouts,
            engine_name: None,
            multipv: 1,
            dead: false,
        }
    }

    pub fn engine_name(&self) -> Option<&str> {
        self.engine_name.as_deref()
    }

    async fn handshake(&mut self) -> Result<(), EngineError> {
        self.send("uci").await?;
        let deadline = Instant::now() + self.timeouts.handshake;
        loop {
            let line = self.next_line_before(deadline, "uciok").await?;
            match parse_uci_message(&line) {
                Ok(UciMessage::UciOk) => break,
                Ok(UciMessage::Id { name, value }) if name == "name" => {
                    self.engine_name = Some(value);
                }
                _ => {}
            }
        }
        tracing::info!(
            worker_id = self.id,
            engine = self.engine_name.as_deref().unwrap_or("unknown"),
            "Engine handshake complete"
        );
        Ok(())
    }

    async fn wait_ready(&mut self) -> Result<(), EngineError> {
        self.send("isready").await?;
        let deadline = Instant::now() + self.timeouts.ready;
        loop {
            let line = self.next_line_before(deadline, "readyok").await?;
            if matches!(parse_uci_message(&line), Ok(UciMessage::ReadyOk)) {
                return Ok(());
            }
        }
    }

    async fn send(&mut self, command: &str) -> Result<(), EngineError> {
        tracing::trace!(worker_id = self.id, "UCI >> {}", command);
        let written = async {
            self.stdin.write_all(command.as_bytes()).await?;
            self.stdin.write_all(b"\n").await?;
            self.stdin.flush().await
        }
        .await;
        written.map_err(|e| {
            self.dead = true;
            tracing::error!(worker_id = self.id, "Failed to write to engine: {}", e);
            EngineError::Crashed(format!("write failed: {e}"))
        })
    }

    async fn next_line(&mut self) -> Result<String, EngineError> {
        match self.stdout.next_line().await {
            Ok(Some(line)) => {
                tracing::trace!(worker_id = self.id, "UCI << {}", line);
                Ok(line)
            }
            Ok(None) => {
                self.dead = true;
                tracing::warn!(worker_id = self.id, "Engine stdout EOF - engine closed");
                Err(EngineError::Crashed("engine closed its output".to_string()))
            }
            Err(e) => {
                self.dead = true;
                tracing::error!(worker_id = self.id, "Error reading from engine: {}", e);
                Err(EngineError::Crashed(format!("read failed: {e}")))
            }
        }
    }

    /// Read a line, failing with `Protocol` if `expecting` is not seen by `deadline`.
    async fn next_line_before(
        &mut self,
        deadline: Instant,
        expecting: &str,
    ) -> Result<String, EngineError> {
        match tokio::time::timeout_at(deadline, self.next_line()).await {
            Ok(line) => line,
            Err(_) => {
                self.dead = true;
                tracing::error!(worker_id = self.id, "Timeout waiting for {}", expecting);
                Err(EngineError::Protocol(format!(
                    "engine did not answer with {expecting}"
                )))
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self, limits), fields(worker_id = self.id))]
    async fn search(&mut self, fen: &str, limits: &SearchLimits) -> Result<EngineEvaluation, EngineError> {
        if self.dead {
            return Err(EngineError::Crashed("worker is dead".to_string()));
        }

        if limits.lines != self.multipv {
            self.send(&format!("setoption name MultiPV value {}", limits.lines))
                .await?;
            self.multipv = limits.lines;
        }

        self.send(&format!("position fen {fen}")).await?;
        self.send(&limits.go_command()).await?;

        let deadline = Instant::now() + limits.timeout;
        let mut latest: BTreeMap<u32, EngineInfo> = BTreeMap::new();

        loop {
            let line = match tokio::time::timeout_at(deadline, self.next_line()).await {
                Ok(line) => line?,
                Err(_) => {
                    tracing::warn!(fen, timeout = ?limits.timeout, "No bestmove before deadline, stopping engine");
                    // The late bestmove would desynchronise the stream; the pool replaces us.
                    let _ = self.send("stop").await;
                    self.dead = true;
                    return Err(EngineError::Timeout(limits.timeout));
                }
            };

            match parse_uci_message(&line) {
                Ok(UciMessage::Info(info)) => {
                    // Only lines carrying a score and a line describe a search result
                    if info.score.is_some() {
                        let index = info.multipv.unwrap_or(1);
                        latest.insert(index, info);
                    }
                }
                Ok(UciMessage::BestMove { mv, ponder }) => {
                    return Ok(assemble(latest, mv, ponder));
                }
                Ok(_) => {}
                Err(e) => tracing::trace!("Failed to parse UCI message: {}", e),
            }
        }
    }

    async fn stop_process(mut self) {
        let _ = self.send("quit").await;
        if let Some(mut process) = self.process.take() {
            let _ = tokio::time::timeout(self.timeouts.shutdown, process.wait()).await;
            let _ = process.kill().await;
        }
        tracing::debug!(worker_id = self.id, "Engine worker shut down");
    }
}

fn assemble(
    latest: BTreeMap<u32, EngineInfo>,
    best: Option<cozy_chess::Move>,
    ponder: Option<cozy_chess::Move>,
) -> EngineEvaluation {
    let lines: Vec<PvLine> = latest
        .iter()
        .filter_map(|(&multipv, info)| {
            Some(PvLine {
                multipv,
                score: info.score?,
                depth: info.depth.unwrap_or(0),
                pv: info.pv.iter().map(|mv| chess::format_uci_move(*mv)).collect(),
            })
        })
        .collect();

    let main = latest.values().next();
    let score = main
        .and_then(|info| info.score)
        .unwrap_or(chess::AnalysisScore::Centipawns(0));
    let mate_in = match score {
        chess::AnalysisScore::Mate(n) => Some(n),
        chess::AnalysisScore::Centipawns(_) => None,
    };

    EngineEvaluation {
        score,
        depth: main.and_then(|i| i.depth).unwrap_or(0),
        seldepth: main.and_then(|i| i.seldepth).unwrap_or(0),
        best_move: best.map(chess::format_uci_move),
        ponder: ponder.map(chess::format_uci_move),
        pv: lines.first().map(|l| l.pv.clone()).unwrap_or_default(),
        nodes: main.and_then(|i| i.nodes).unwrap_or(0),
        time_ms: main.and_then(|i| i.time_ms).unwrap_or(0),
        mate_in,
        lines,
    }
}

impl AnalysisEngine for UciWorker {
    fn id(&self) -> usize {
        self.id
    }

    async fn configure(&mut self, options: &EngineOptions) -> Result<(), EngineError> {
        tracing::info!(worker_id = self.id, ?options, "Configuring engine");
        for command in options.setoption_commands() {
            self.send(&command).await?;
        }
        self.wait_ready().await
    }

    async fn evaluate(
        &mut self,
        fen: &str,
        limits: &SearchLimits,
    ) -> Result<EngineEvaluation, EngineError> {
        self.search(fen, limits).await
    }

    fn is_healthy(&mut self) -> bool {
        if self.dead {
            return false;
        }
        match self.process.as_mut().map(Child::try_wait) {
            // Exited, or the OS can no longer tell us
            Some(Ok(Some(_))) | Some(Err(_)) => {
                self.dead = true;
                false
            }
            Some(Ok(None)) | None => true,
        }
    }

    async fn shutdown(self) {
        self.stop_process().await;
    }
}

/// Spawns Stockfish (or any UCI engine) processes for a pool.
#[derive(Debug, Clone)]
pub struct StockfishFactory {
    path: PathBuf,
    timeouts: WorkerTimeouts,
}

impl StockfishFactory {
    pub fn new(path: PathBuf, timeouts: WorkerTimeouts) -> Self {
        Self { path, timeouts }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EngineFactory for StockfishFactory {
    type Engine = UciWorker;

    async fn spawn(&self, id: usize) -> Result<UciWorker, EngineError> {
        UciWorker::spawn(id, &self.path, self.timeouts).await
    }
}

/// Find Stockfish executable in common locations
pub fn find_engine_binary() -> Option<PathBuf> {
    let candidates = [
        "/usr/local/bin/stockfish",
        "/usr/bin/stockfish",
        "/opt/homebrew/bin/stockfish",
        "/usr/games/stockfish",
    ];

    if let Some(path) = candidates.iter().map(Path::new).find(|p| p.is_file()) {
        return Some(path.to_path_buf());
    }

    // In PATH
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join("stockfish"))
            .find(|p| p.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::AnalysisScore;
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

    /// The engine side of a duplex pipe: reads our commands, writes replies.
    struct FakeEngine {
        commands: Lines<BufReader<ReadHalf<DuplexStream>>>,
        replies: WriteHalf<DuplexStream>,
    }

    impl FakeEngine {
        async fn expect(&mut self, prefix: &str) -> String {
            loop {
                let line = self.commands.next_line().await.unwrap().unwrap();
                if line.starts_with(prefix) {
                    return line;
                }
            }
        }

        async fn reply(&mut self, lines: &[&str]) {
            for line in lines {
                self.replies.write_all(line.as_bytes()).await.unwrap();
                self.replies.write_all(b"\n").await.unwrap();
            }
            self.replies.flush().await.unwrap();
        }
    }

    fn timeouts() -> WorkerTimeouts {
        WorkerTimeouts {
            handshake: Duration::from_secs(1),
            ready: Duration::from_secs(1),
            shutdown: Duration::from_millis(10),
        }
    }

    async fn connected_worker() -> (UciWorker, FakeEngine) {
        let (ours, theirs) = duplex(64 * 1024);
        let (our_read, our_write) = split(ours);
        let (their_read, their_write) = split(theirs);
        let mut fake = FakeEngine {
            commands: BufReader::new(their_read).lines(),
            replies: their_write,
        };

        let engine_side = tokio::spawn(async move {
            fake.expect("uci").await;
            fake.reply(&["id name FakeFish 1.0", "option name Hash type spin", "uciok"])
                .await;
            fake
        });
        let worker = UciWorker::from_streams(0, our_read, our_write, timeouts())
            .await
            .unwrap();
        (worker, engine_side.await.unwrap())
    }

    #[tokio::test]
    async fn test_handshake_records_engine_name() {
        let (worker, _fake) = connected_worker().await;
        assert_eq!(worker.engine_name(), Some("FakeFish 1.0"));
    }

    #[tokio::test]
    async fn test_configure_waits_for_readyok() {
        let (mut worker, mut fake) = connected_worker().await;
        let engine_side = tokio::spawn(async move {
            let threads = fake.expect("setoption name Threads").await;
            fake.expect("isready").await;
            fake.reply(&["readyok"]).await;
            threads
        });
        worker.configure(&EngineOptions::default()).await.unwrap();
        assert_eq!(engine_side.await.unwrap(), "setoption name Threads value 1");
    }

    #[tokio::test]
    async fn test_configure_without_readyok_is_protocol_error() {
        let (mut worker, _fake) = connected_worker().await;
        let err = worker.configure(&EngineOptions::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_evaluate_collects_multipv_lines() {
        let (mut worker, mut fake) = connected_worker().await;
        let engine_side = tokio::spawn(async move {
            fake.expect("setoption name MultiPV value 2").await;
            let position = fake.expect("position fen").await;
            let go = fake.expect("go").await;
            fake.reply(&[
                "info string NNUE enabled",
                "info depth 5 seldepth 7 multipv 1 score cp 20 nodes 100 time 3 pv d2d4",
                "info depth 8 seldepth 11 multipv 1 score cp 31 nodes 900 time 9 pv e2e4 e7e5",
                "info depth 8 seldepth 10 multipv 2 score cp 12 nodes 900 time 9 pv d2d4 d7d5",
                "info depth 8 currmove g1f3 currmovenumber 3",
                "bestmove e2e4 ponder e7e5",
            ])
            .await;
            (position, go)
        });

        let limits = SearchLimits::new(8, 0, 2);
        let eval = worker.evaluate(chess::START_FEN, &limits).await.unwrap();
        let (position, go) = engine_side.await.unwrap();

        assert_eq!(position, format!("position fen {}", chess::START_FEN));
        assert_eq!(go, "go depth 8");
        assert_eq!(eval.score, AnalysisScore::Centipawns(31));
        assert_eq!(eval.depth, 8);
        assert_eq!(eval.seldepth, 11);
        assert_eq!(eval.nodes, 900);
        assert_eq!(eval.best_move.as_deref(), Some("e2e4"));
        assert_eq!(eval.ponder.as_deref(), Some("e7e5"));
        assert_eq!(eval.pv, ["e2e4", "e7e5"]);
        assert_eq!(eval.lines.len(), 2);
        assert_eq!(eval.lines[1].score, AnalysisScore::Centipawns(12));
        assert!(worker.is_healthy());
    }

    #[tokio::test]
    async fn test_evaluate_terminal_position() {
        let (mut worker, mut fake) = connected_worker().await;
        let engine_side = tokio::spawn(async move {
            fake.expect("go").await;
            fake.reply(&["info depth 0 score mate 0", "bestmove (none)"]).await;
        });
        let fen = "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3";
        let eval = worker
            .evaluate(fen, &SearchLimits::new(4, 0, 1))
            .await
            .unwrap();
        engine_side.await.unwrap();
        assert_eq!(eval.best_move, None);
        assert_eq!(eval.mate_in, Some(0));
    }

    #[tokio::test]
    async fn test_missing_bestmove_times_out_and_marks_dead() {
        let (mut worker, mut fake) = connected_worker().await;
        let engine_side = tokio::spawn(async move {
            fake.expect("go").await;
            fake.reply(&["info depth 1 score cp 5 pv e2e4"]).await;
            fake.expect("stop").await
        });
        let limits = SearchLimits::new(30, 0, 1).with_timeout(Duration::from_millis(50));
        let err = worker.evaluate(chess::START_FEN, &limits).await.unwrap_err();
        assert_eq!(err, EngineError::Timeout(Duration::from_millis(50)));
        assert_eq!(engine_side.await.unwrap(), "stop");
        assert!(!worker.is_healthy());
    }

    #[tokio::test]
    async fn test_closed_pipe_is_a_crash() {
        let (mut worker, mut fake) = connected_worker().await;
        let engine_side = tokio::spawn(async move {
            fake.expect("go").await;
            drop(fake);
        });
        let err = worker
            .evaluate(chess::START_FEN, &SearchLimits::new(5, 0, 1))
            .await
            .unwrap_err();
        engine_side.await.unwrap();
        assert!(matches!(err, EngineError::Crashed(_)));
        assert!(!worker.is_healthy());

        let again = worker
            .evaluate(chess::START_FEN, &SearchLimits::new(5, 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(again, EngineError::Crashed(_)));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (ours, _theirs) = duplex(1024);
        let (read, write) = split(ours);
        let result = UciWorker::from_streams(0, read, write, timeouts()).await;
        assert!(matches!(result, Err(EngineError::Protocol(_))));
    }

    #[tokio::test]
    #[ignore = "requires a Stockfish binary"]
    async fn test_real_stockfish_evaluates_start_position() {
        let path = find_engine_binary().expect("stockfish not installed");
        let mut worker = UciWorker::spawn(0, &path, WorkerTimeouts::default())
            .await
            .unwrap();
        worker.configure(&EngineOptions::default()).await.unwrap();
        let eval = worker
            .evaluate(chess::START_FEN, &SearchLimits::new(8, 0, 2))
            .await
            .unwrap();
        assert!(eval.best_move.is_some());
        assert_eq!(eval.lines.len(), 2);
        worker.shutdown().await;
    }
}
