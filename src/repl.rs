use std::io::{Error as IoError, Write};

use console::{style, Key, Term};
use itertools::Itertools;

use crate::{
    generate::{key_sequence, RNG},
    trace::{SnapshotNode, Step},
    tree::{BTree, NodeId, TreeError},
};

#[derive(Debug)]
pub enum ReplError {
    TreeError(TreeError),
    IoError(IoError),
}
impl From<TreeError> for ReplError {
    fn from(value: TreeError) -> Self {
        Self::TreeError(value)
    }
}
impl From<IoError> for ReplError {
    fn from(value: IoError) -> Self {
        Self::IoError(value)
    }
}

type Result<T> = std::result::Result<T, ReplError>;

const HELP: &str = "commands: insert <k>, delete <k>, search <k>, random <n>, keys, exit";

/// Terminal playback layer. Runs one engine operation per command, then
/// steps through the returned trace under key control. Only the recorded
/// snapshots are rendered; the live tree is never touched during playback,
/// and each step is drawn entirely from its own snapshot.
pub struct Repl {
    tree: BTree<i64>,
    term: Term,
    rng: RNG,
}
impl Repl {
    pub fn new(order: usize) -> Result<Self> {
        Ok(Repl {
            tree: BTree::new(order)?,
            term: Term::stdout(),
            rng: RNG::new(),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        self.term.write_line(&format!(
            "B-tree step tracer (order {}). {HELP}",
            self.tree.order()
        ))?;
        loop {
            self.term.write_all("> ".as_bytes())?;
            self.term.flush()?;
            let line = self.term.read_line()?;
            let mut parts = line.split_whitespace();
            let command = match parts.next() {
                Some(command) => command,
                None => continue,
            };
            match (command, parts.next()) {
                ("exit", _) => break,
                ("keys", _) => {
                    self.term
                        .write_line(&format!("{:?}", self.tree.keys_in_order()))?;
                }
                ("insert", Some(arg)) => match arg.parse() {
                    Ok(key) => {
                        let steps = self.tree.insert(key);
                        self.play(&steps)?;
                    }
                    Err(_) => self.term.write_line("expected an integer key")?,
                },
                ("delete", Some(arg)) => match arg.parse() {
                    Ok(key) => {
                        let steps = self.tree.delete(&key);
                        self.play(&steps)?;
                    }
                    Err(_) => self.term.write_line("expected an integer key")?,
                },
                ("search", Some(arg)) => match arg.parse() {
                    Ok(key) => {
                        let steps = self.tree.search(&key);
                        self.play(&steps)?;
                    }
                    Err(_) => self.term.write_line("expected an integer key")?,
                },
                ("random", Some(arg)) => match arg.parse::<usize>() {
                    Ok(count) => {
                        let keys = key_sequence(&mut self.rng, count);
                        self.term.write_line(&format!("inserting {keys:?}"))?;
                        let mut steps = Vec::new();
                        for key in keys {
                            steps = self.tree.insert(key);
                        }
                        // Only the last operation's trace is replayable;
                        // each call replaces the previous sequence.
                        self.play(&steps)?;
                    }
                    Err(_) => self.term.write_line("expected a count")?,
                },
                _ => self.term.write_line(HELP)?,
            }
        }
        Ok(())
    }

    /// Step viewer: 0-indexed random access over the recorded sequence.
    fn play(&mut self, steps: &[Step<i64>]) -> Result<()> {
        if steps.is_empty() {
            return Ok(());
        }
        let mut current = 0;
        loop {
            self.render(&steps[current], current, steps.len())?;
            match self.term.read_key()? {
                Key::ArrowRight | Key::Char('n') => current = (current + 1).min(steps.len() - 1),
                Key::ArrowLeft | Key::Char('p') => current = current.saturating_sub(1),
                Key::Home | Key::Char('s') => current = 0,
                Key::End | Key::Char('e') => current = steps.len() - 1,
                Key::Char('q') | Key::Escape | Key::Enter => break,
                _ => (),
            }
        }
        self.term.write_line("")?;
        Ok(())
    }

    fn render(&mut self, step: &Step<i64>, index: usize, total: usize) -> Result<()> {
        self.term.clear_screen()?;
        self.term
            .write_line(&format!("Step {}/{}: {}", index + 1, total, step.message))?;
        self.term.write_line("")?;

        let mut level: Vec<&SnapshotNode<i64>> = vec![&step.tree];
        while !level.is_empty() {
            let line = level
                .iter()
                .map(|node| Repl::format_node(node, &step.highlight))
                .join("   ");
            self.term.write_line(&line)?;
            let next = level
                .iter()
                .flat_map(|node| node.children.iter())
                .collect();
            level = next;
        }

        self.term.write_line("")?;
        self.term
            .write_line("←/→ step, Home/End jump, q to return")?;
        Ok(())
    }

    fn format_node(node: &SnapshotNode<i64>, highlight: &[NodeId]) -> String {
        let keys = node.keys.iter().join(" ");
        if highlight.contains(&node.id) {
            style(format!("[{keys}]")).yellow().bold().to_string()
        } else {
            format!("[{keys}]")
        }
    }
}
