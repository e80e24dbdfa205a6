use atom::eval::Interp;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    let mut interactive = false;
    let mut files: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-i" | "--interactive" => {
                interactive = true;
                i += 1;
            }
            "-f" | "--file" => {
                if i + 1 < args.len() {
                    files.push(args[i + 1].clone());
                    i += 2;
                } else {
                    eprintln!("Error: filename expected");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                eprintln!("Try 'atom --help' for usage information.");
                std::process::exit(1);
            }
        }
    }

    let mut interp = Interp::new();

    for path in &files {
        if let Err(e) = interp.load_file(path) {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    if interactive {
        run_repl(&mut interp);
    } else if files.is_empty() {
        usage();
    }
}

fn usage() {
    println!("Usage: atom [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -f, --file <path>    Load and evaluate a source file");
    println!("  -i, --interactive    Enter an interactive read-eval loop");
    println!("  -h, --help           Show this help message");
}

/// Interactive loop: each non-empty line is one load cycle, so errors are
/// reported and recovered per line and a collection runs between lines.
fn run_repl(interp: &mut Interp) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Error: {}", e);
            return;
        }
    };

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());
                interp.load(&line);
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }
    }
}
