mod cli;

use std::collections::HashSet;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sherpa::config;
use sherpa::generator::HttpSource;
use sherpa::sensor::ReplaySensor;
use sherpa::session::{SessionSnapshot, TaskEngine};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let settings = config::load(cli.config.as_deref())?;
    let source = Arc::new(HttpSource::new(&settings)?);
    let sensor = Arc::new(ReplaySensor::from_dir(&cli.frames)?);
    let engine = TaskEngine::new(source, sensor.clone(), &settings).await;

    let previews_dir = std::env::temp_dir().join("sherpa-previews");
    std::fs::create_dir_all(&previews_dir)
        .with_context(|| format!("could not create {}", previews_dir.display()))?;

    spawn_printer(&engine, previews_dir);

    engine.set_goal(cli.goal.clone());
    println!("goal: {}", cli.goal);
    println!(
        "intents: empty line = next, r = refresh, c = screen change, \
         b <n> = back to step n, ! <message> = revise, q = quit, \
         anything else asks a question"
    );
    engine.start().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => engine.next().await,
            "q" => break,
            "r" => engine.refresh().await,
            "c" => {
                if !sensor.emit_change().await? {
                    println!("(change event dropped: not watching or paused)");
                }
            }
            _ => {
                if let Some(rest) = line.strip_prefix("b ")
                    && let Ok(n) = rest.trim().parse::<usize>()
                    && n >= 1
                {
                    engine.return_to(n - 1);
                } else if let Some(message) = line.strip_prefix('!') {
                    engine.revise(message.trim()).await;
                } else {
                    engine.ask(line).await;
                }
            }
        }
    }

    engine.reset();
    Ok(())
}

/// Reads `RUST_LOG`, defaulting to `warn`. Compact format on stderr so log
/// lines do not interleave with the instruction stream on stdout.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

/// Watch the session and print what changed. Also consumes the
/// auto-complete signal by advancing to the next instruction.
fn spawn_printer(engine: &TaskEngine, previews_dir: PathBuf) {
    let engine = engine.clone();
    let mut snapshots = engine.subscribe();
    tokio::spawn(async move {
        let mut printer = Printer::new(previews_dir);
        let mut consumed = 0u32;
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            printer.render(&snapshot).await;
            if snapshot.auto_complete_count > consumed {
                consumed = snapshot.auto_complete_count;
                println!("step completed on its own, moving on");
                engine.next().await;
            } else if snapshot.auto_complete_count < consumed {
                // Session was reset.
                consumed = snapshot.auto_complete_count;
            }
        }
    });
}

struct Printer {
    previews_dir: PathBuf,
    shown: usize,
    saved: HashSet<usize>,
    answer_len: usize,
    was_answering: bool,
    was_analyzing: bool,
    budget_announced: bool,
}

impl Printer {
    fn new(previews_dir: PathBuf) -> Self {
        Self {
            previews_dir,
            shown: 0,
            saved: HashSet::new(),
            answer_len: 0,
            was_answering: false,
            was_analyzing: false,
            budget_announced: false,
        }
    }

    async fn render(&mut self, snapshot: &SessionSnapshot) {
        let len = snapshot.instructions.len();
        if len < self.shown {
            // Rewind or refresh dropped instructions; re-announce from here.
            self.shown = len;
            self.saved.retain(|&i| i < len);
        }
        for (i, instruction) in snapshot.instructions.iter().enumerate().skip(self.shown) {
            println!("{}. {}", i + 1, instruction.text);
        }
        self.shown = len;

        for (i, instruction) in snapshot.instructions.iter().enumerate() {
            if let Some(preview) = &instruction.preview
                && !self.saved.contains(&i)
            {
                let path = self.previews_dir.join(format!("step-{:02}.png", i + 1));
                match tokio::fs::write(&path, preview.png.as_ref()).await {
                    Ok(()) => println!("   preview: {}", path.display()),
                    Err(err) => warn!(%err, "could not save preview"),
                }
                self.saved.insert(i);
            }
        }

        self.render_answer(snapshot);

        if snapshot.analyzing && !self.was_analyzing {
            println!("(checking progress)");
        }
        self.was_analyzing = snapshot.analyzing;

        if snapshot.budget_exceeded && !self.budget_announced {
            println!("instruction budget exhausted, the session is over");
            self.budget_announced = true;
        }
    }

    /// Answers stream as ever-longer full texts; print just the new tail.
    fn render_answer(&mut self, snapshot: &SessionSnapshot) {
        let answer = snapshot
            .instructions
            .last()
            .and_then(|i| i.follow_ups.last())
            .map(|f| f.answer.as_str())
            .unwrap_or_default();
        if snapshot.answering {
            if let Some(delta) = answer.get(self.answer_len..)
                && !delta.is_empty()
            {
                print!("{delta}");
                let _ = std::io::stdout().flush();
                self.answer_len = answer.len();
            }
        } else if self.was_answering {
            if self.answer_len > 0 {
                println!();
            } else if !answer.is_empty() {
                println!("{answer}");
            }
            self.answer_len = 0;
        }
        self.was_answering = snapshot.answering;
    }
}
