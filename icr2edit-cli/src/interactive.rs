//! Menu-driven editing session over stdin/stdout.

use std::io::{BufRead, Write};

use icr2edit_core::{apply_edit, modified_rows, snapshot, Category, FieldValue, Selector};

use crate::render::parameter_table;
use crate::session::Session;
use crate::CliError;

enum Step {
    Stay,
    Quit,
}

fn prompt<R: BufRead, W: Write>(input: &mut R, out: &mut W, text: &str) -> Result<Option<String>, CliError> {
    write!(out, "{text}")?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

pub fn run<R: BufRead, W: Write>(session: &mut Session, mut input: R, mut out: W) -> Result<(), CliError> {
    writeln!(
        out,
        "{} ({} bytes), detected version: {}",
        session.path.display(),
        session.image.len(),
        session.image.variant().tag
    )?;

    loop {
        let categories = session.catalog.categories();
        writeln!(out, "\nAvailable categories:")?;
        for (i, category) in categories.iter().enumerate() {
            writeln!(out, "[{}] {category}", i + 1)?;
        }
        writeln!(out, "[s] Save all changes")?;
        writeln!(out, "[r] Revert unsaved changes")?;
        writeln!(out, "[q] Quit")?;

        let Some(choice) = prompt(&mut input, &mut out, "Select an option: ")? else {
            if session.image.is_modified() {
                writeln!(out, "\nInput closed; unsaved changes discarded.")?;
            }
            return Ok(());
        };

        let step = match choice.to_ascii_lowercase().as_str() {
            "q" => quit(session, &mut input, &mut out)?,
            "s" => {
                save(session, &mut out)?;
                Step::Stay
            }
            "r" => {
                let count = modified_rows(&session.image, &session.catalog)?.count();
                session.image.revert();
                writeln!(out, "Reverted {count} parameter(s).")?;
                Step::Stay
            }
            other => match other.parse::<usize>().ok().and_then(|n| categories.get(n.checked_sub(1)?)) {
                Some(&category) => category_menu(session, category, &mut input, &mut out)?,
                None => {
                    writeln!(out, "Invalid selection.")?;
                    Step::Stay
                }
            },
        };
        if let Step::Quit = step {
            return Ok(());
        }
    }
}

fn quit<R: BufRead, W: Write>(session: &mut Session, input: &mut R, out: &mut W) -> Result<Step, CliError> {
    if !session.image.is_modified() {
        return Ok(Step::Quit);
    }
    let answer = prompt(input, out, "You have unsaved changes. Save now? (y/n): ")?;
    if answer.is_some_and(|a| a.eq_ignore_ascii_case("y")) {
        if !save(session, out)? {
            return Ok(Step::Stay);
        }
    }
    Ok(Step::Quit)
}

fn save<W: Write>(session: &mut Session, out: &mut W) -> Result<bool, CliError> {
    if !session.image.is_modified() {
        writeln!(out, "No changes to save.")?;
        return Ok(true);
    }
    match session.save() {
        Ok(()) => {
            writeln!(out, "Changes saved.")?;
            Ok(true)
        }
        Err(err) => {
            writeln!(out, "Error: {err}")?;
            Ok(false)
        }
    }
}

fn category_menu<R: BufRead, W: Write>(
    session: &mut Session,
    category: Category,
    input: &mut R,
    out: &mut W,
) -> Result<Step, CliError> {
    loop {
        let table = parameter_table(category, snapshot(&session.image, &session.catalog)?);
        writeln!(out, "\n{table}")?;

        let Some(action) = prompt(input, out, "Select a parameter to edit or [b] to go back: ")? else {
            return Ok(Step::Quit);
        };
        if action.eq_ignore_ascii_case("b") {
            return Ok(Step::Stay);
        }

        let selector = match action.parse::<usize>() {
            Ok(index) if session.catalog.get(Selector::new(category, index)).is_some() => {
                Selector::new(category, index)
            }
            _ => {
                writeln!(out, "Invalid selection.")?;
                continue;
            }
        };
        if let Step::Quit = edit_one(session, selector, input, out)? {
            return Ok(Step::Quit);
        }
    }
}

fn edit_one<R: BufRead, W: Write>(
    session: &mut Session,
    selector: Selector,
    input: &mut R,
    out: &mut W,
) -> Result<Step, CliError> {
    let definition = session.catalog.resolve(selector)?;
    let encoding = definition.encoding;
    let current = snapshot(&session.image, &session.catalog)?
        .find(|row| row.definition.selector() == selector)
        .map(|row| row.value);
    let (min, max) = encoding.raw_range();
    let bound = |raw| FieldValue {
        raw,
        scale: encoding.scale,
    };

    let title = match definition.description.as_str() {
        "" => definition.name.as_str(),
        description => description,
    };
    writeln!(out, "\nEditing: {title}")?;
    writeln!(
        out,
        "Comment: {}",
        definition.comment.as_deref().unwrap_or("(No comment provided)")
    )?;
    if let Some(current) = current {
        writeln!(out, "Current value: {current}")?;
    }
    writeln!(
        out,
        "Expected type: {} (range: {} to {})",
        encoding.type_name(),
        bound(min),
        bound(max)
    )?;

    let Some(text) = prompt(input, out, "Enter new value: ")? else {
        return Ok(Step::Quit);
    };
    match apply_edit(&mut session.image, &session.catalog, selector, &text) {
        Ok(outcome) => writeln!(out, "Value updated in session: {} -> {}", outcome.previous, outcome.current)?,
        Err(err) if err.is_recoverable() => writeln!(out, "Error: {err}")?,
        Err(err) => return Err(err.into()),
    }
    Ok(Step::Stay)
}
