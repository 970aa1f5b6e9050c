use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table};
use colored::*;
use llama_inference::llm::backend::DeviceId;
use llama_inference::llm::placement::DeviceMap;
use llama_inference::LlamaInference;

/// Consecutive modules placed on the same device
#[derive(Debug, PartialEq)]
struct Span {
    device: DeviceId,
    first: String,
    last: String,
    count: usize,
}

fn spans(map: &DeviceMap) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::new();
    for (unit, device) in map.iter() {
        match spans.last_mut() {
            Some(span) if span.device == device => {
                span.last = unit.to_string();
                span.count += 1;
            }
            _ => spans.push(Span { device, first: unit.to_string(), last: unit.to_string(), count: 1 }),
        }
    }
    spans
}

fn header(titles: &[&str]) -> Vec<Cell> {
    titles
        .iter()
        .map(|t| Cell::new(t).fg(comfy_table::Color::Cyan).add_attribute(Attribute::Bold))
        .collect()
}

fn format_bytes(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= 1024.0 * MIB {
        format!("{:.2} GiB", bytes as f64 / (1024.0 * MIB))
    } else {
        format!("{:.1} MiB", bytes as f64 / MIB)
    }
}

/// Prints where each module of the model ended up.
pub fn display_device_map(session: &LlamaInference) {
    let args = session.args();
    println!(
        "{} {} {}",
        format!("LLaMA {}", session.variant()).bright_green().bold(),
        format!("({} layers, dim {}, vocab {}, {})", args.n_layers, args.dim, args.vocab_size, session.dtype()).bright_black(),
        format!("session {}", session.id()).bright_black()
    );

    let devices = session.devices();
    let mut table = Table::new();
    table
        .set_header(header(&["Device", "Name", "Modules", "Allocated", "Budget"]))
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    for span in spans(session.device_map()) {
        let (name, allocated, budget) = match devices.get(span.device) {
            Ok(backend) => {
                let info = backend.info();
                (
                    info.name.clone(),
                    format_bytes(backend.allocated_bytes()),
                    info.memory_limit.map_or_else(|| "unbounded".to_string(), format_bytes),
                )
            }
            Err(_) => ("?".to_string(), "-".to_string(), "-".to_string()),
        };
        let modules = if span.count == 1 {
            span.first
        } else {
            format!("{} .. {} ({} modules)", span.first, span.last, span.count)
        };
        table.add_row(vec![
            Cell::new(span.device.to_string()).fg(comfy_table::Color::White).set_alignment(CellAlignment::Center),
            Cell::new(name).fg(comfy_table::Color::Yellow),
            Cell::new(modules).fg(comfy_table::Color::Green),
            Cell::new(allocated).fg(comfy_table::Color::Blue).set_alignment(CellAlignment::Right),
            Cell::new(budget).fg(comfy_table::Color::DarkGrey).set_alignment(CellAlignment::Right),
        ]);
    }

    println!("\n{}", table);
    println!(
        "{}",
        format!(
            "Loaded at {} · {} total",
            session.loaded_at().format("%Y-%m-%d %H:%M:%S"),
            format_bytes(session.allocated_bytes())
        )
        .bright_black()
    );
}

/// Prints each prompt followed by its completion.
pub fn display_results(prompts: &[String], outputs: &[String]) {
    if outputs.is_empty() {
        println!("{}", "No prompts to complete".yellow());
        return;
    }
    for (prompt, output) in prompts.iter().zip(outputs) {
        println!("{}", "=".repeat(80).bright_black());
        println!("{} {}", "Prompt:".cyan().bold(), prompt);
        println!("{}", output.green());
    }
    println!("{}", "=".repeat(80).bright_black());
}
