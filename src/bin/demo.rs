use clap::{Parser, Subcommand};
use collab_sync::{apply, make_patch, PatchBundle};
use colored::*;
use std::io::{self, Write};

#[derive(Parser)]
#[command(name = "sync-demo")]
#[command(about = "Interactive demonstration of differential synchronization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive demo with two users editing simultaneously
    Interactive {
        #[arg(short, long, default_value = "The quick brown fox jumps over the lazy dog")]
        initial_text: String,
    },
    /// Simulation of concurrent edits
    Simulate {
        #[arg(short, long, default_value = "4")]
        iterations: usize,
    },
    /// Benchmark synchronization performance
    Benchmark {
        #[arg(short, long, default_value = "1000")]
        iterations: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Interactive { initial_text } => run_interactive_demo(initial_text),
        Commands::Simulate { iterations } => run_simulation(iterations),
        Commands::Benchmark { iterations } => run_benchmark(iterations),
    }
}

/// A standalone peer that plays the part of one side of differential
/// synchronization, without needing a `Session`/`Room` to demonstrate the
/// core diff/patch cycle.
struct DemoPeer {
    name: String,
    content: String,
    shadow: String,
}

impl DemoPeer {
    fn new(name: &str, content: String) -> Self {
        Self { name: name.to_string(), shadow: content.clone(), content }
    }

    fn edit(&mut self, new_content: &str) {
        self.content = new_content.to_string();
    }

    fn diff_and_update_shadow(&mut self) -> PatchBundle {
        let bundle = make_patch(&self.shadow, &self.content);
        self.shadow = self.content.clone();
        bundle
    }

    fn apply_incoming(&mut self, bundle: &PatchBundle) -> bool {
        if bundle.is_empty() {
            return true;
        }
        let (new_shadow, results) = apply(bundle, &self.shadow);
        if !PatchBundle::fully_applied(&results) {
            return false;
        }
        self.shadow = new_shadow.clone();
        let (new_content, content_results) = apply(bundle, &self.content);
        if !PatchBundle::fully_applied(&content_results) {
            return false;
        }
        self.content = new_content;
        true
    }
}

fn sync_pair(a: &mut DemoPeer, b: &mut DemoPeer) -> (usize, usize) {
    let a_to_b = a.diff_and_update_shadow();
    let a_len = a_to_b.len();
    b.apply_incoming(&a_to_b);

    let b_to_a = b.diff_and_update_shadow();
    let b_len = b_to_a.len();
    a.apply_incoming(&b_to_a);

    (a_len, b_len)
}

fn run_interactive_demo(initial_text: String) {
    println!("{}", "=== Differential Synchronization Demo ===".bold().cyan());
    println!("This demo simulates two users editing the same document.");
    println!("You can edit both 'Alice' and 'Bob' documents and see them sync.");
    println!("Commands: 'a <text>' (edit Alice), 'b <text>' (edit Bob), 's' (sync), 'q' (quit)\n");

    let mut alice = DemoPeer::new("Alice", initial_text.clone());
    let mut bob = DemoPeer::new("Bob", initial_text);

    print_state(&alice, &bob);

    loop {
        print!("\n> ");
        io::stdout().flush().unwrap();

        let mut input = String::new();
        io::stdin().read_line(&mut input).unwrap();
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        match input.chars().next() {
            Some('q') => {
                println!("Goodbye!");
                break;
            }
            Some('s') => {
                println!("{}", "=== Synchronizing ===".yellow());
                let (a_edits, b_edits) = sync_pair(&mut alice, &mut bob);
                print_sync_results(a_edits, b_edits);
                print_state(&alice, &bob);
            }
            Some('a') => {
                let text = input[1..].trim();
                if !text.is_empty() {
                    alice.edit(text);
                    println!("{} Alice edited document", "\u{270f}\u{fe0f}".green());
                    print_state(&alice, &bob);
                }
            }
            Some('b') => {
                let text = input[1..].trim();
                if !text.is_empty() {
                    bob.edit(text);
                    println!("{} Bob edited document", "\u{270f}\u{fe0f}".green());
                    print_state(&alice, &bob);
                }
            }
            Some('h') | Some('?') => print_help(),
            _ => println!("Unknown command. Type 'h' for help."),
        }
    }
}

fn run_simulation(iterations: usize) {
    println!("{}", "=== Concurrent Edit Simulation ===".bold().cyan());

    let mut alice = DemoPeer::new("Alice", "The cat sat on the mat.".to_string());
    let mut bob = DemoPeer::new("Bob", "The cat sat on the mat.".to_string());

    let alice_edits = [
        "The big cat sat on the mat.",
        "The big black cat sat on the mat.",
        "The big black cat sat on the soft mat.",
        "The big black cat sat comfortably on the soft mat.",
    ];
    let bob_edits = [
        "The cat sat on the red mat.",
        "The cat sat peacefully on the red mat.",
        "The cat sat peacefully on the red woolen mat.",
        "The friendly cat sat peacefully on the red woolen mat.",
    ];

    println!("Initial state:");
    print_state(&alice, &bob);

    for i in 0..iterations.min(alice_edits.len()).min(bob_edits.len()) {
        println!("\n{}", format!("=== Iteration {} ===", i + 1).yellow());

        alice.edit(alice_edits[i]);
        bob.edit(bob_edits[i]);

        println!("After concurrent edits:");
        print_state(&alice, &bob);

        let (a_edits, b_edits) = sync_pair(&mut alice, &mut bob);

        println!("\nAfter synchronization:");
        print_sync_results(a_edits, b_edits);
        print_state(&alice, &bob);

        if alice.content == bob.content {
            println!("{} Documents are synchronized!", "\u{2705}".green());
        } else {
            println!("{} Documents are out of sync!", "\u{274c}".red());
        }
    }
}

fn run_benchmark(iterations: usize) {
    println!("{}", "=== Synchronization Benchmark ===".bold().cyan());

    let start = std::time::Instant::now();
    let mut successful_syncs = 0;
    let mut total_edits = 0;

    for i in 0..iterations {
        let mut alice = DemoPeer::new("Alice", format!("Document {i} content"));
        let mut bob = DemoPeer::new("Bob", format!("Document {i} content"));

        alice.edit(&format!("Alice modified document {i} with some changes"));
        bob.edit(&format!("Bob also modified document {i} differently"));

        let (a_edits, b_edits) = sync_pair(&mut alice, &mut bob);
        if alice.content == bob.content {
            successful_syncs += 1;
        }
        total_edits += a_edits + b_edits;
    }

    let duration = start.elapsed();

    println!("Completed {iterations} synchronization cycles in {duration:?}");
    println!(
        "Successful syncs: {} ({:.1}%)",
        successful_syncs,
        (successful_syncs as f64 / iterations as f64) * 100.0
    );
    println!("Total hunks processed: {total_edits}");
    println!("Average time per sync: {:?}", duration / iterations as u32);
    println!("Syncs per second: {:.1}", iterations as f64 / duration.as_secs_f64());
}

fn print_state(alice: &DemoPeer, bob: &DemoPeer) {
    println!("\n{}", "Current State:".bold());
    println!("  {}: \"{}\"", "Alice".blue().bold(), truncate_text(&alice.content, 60));
    println!("  {}:   \"{}\"", "Bob".green().bold(), truncate_text(&bob.content, 60));

    if alice.content == bob.content {
        println!("  {}", "\u{2705} Documents are in sync".green());
    } else {
        println!("  {}", "\u{274c} Documents differ".red());
    }
}

fn print_sync_results(a_edits: usize, b_edits: usize) {
    if a_edits > 0 {
        println!("  Alice -> Bob: {}", format!("{a_edits} hunks").cyan());
    }
    if b_edits > 0 {
        println!("  Bob -> Alice: {}", format!("{b_edits} hunks").cyan());
    }
    if a_edits == 0 && b_edits == 0 {
        println!("  {}", "No changes to sync".dimmed());
    }
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        format!("{}...", &text[..max_len.saturating_sub(3)])
    }
}

fn print_help() {
    println!("\n{}", "Available Commands:".bold());
    println!("  {} <text>  - Edit Alice's document", "a".blue().bold());
    println!("  {} <text>  - Edit Bob's document", "b".green().bold());
    println!("  {}         - Synchronize documents", "s".yellow().bold());
    println!("  {}         - Show this help", "h".white().bold());
    println!("  {}         - Quit", "q".red().bold());
}
