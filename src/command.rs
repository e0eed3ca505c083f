/// Service calls, and parsing them from console lines.
///
/// Each switch exposes services named after it, the way the plugin host
/// names them: `<slug>_update`, `<slug>_force_update`, plus on/off/status.
///
///   myflux_update
///   myflux_force_update light.desk light.hall
///   myflux_turn_off

/// Operations a switch accepts from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    /// Recompute and push to lights that pass the update gate.
    Update,
    /// Push to the given lights (or all) regardless of manual changes.
    ForceUpdate(Option<Vec<String>>),
    TurnOn,
    TurnOff,
    Status,
}

/// A service call addressed to one switch by its slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub switch: String,
    pub call: ServiceCall,
}

/// Lowercase, with every run of non-alphanumerics collapsed to one `_`.
pub fn slugify(text: &str) -> String {
    let mut out = String::new();
    let mut pending_sep = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }
    out
}

const SERVICES: [&str; 5] = ["force_update", "update", "turn_on", "turn_off", "status"];

/// Every service name a switch with this slug exposes.
pub fn service_names(slug: &str) -> impl Iterator<Item = String> + '_ {
    SERVICES.iter().map(move |name| format!("{slug}_{name}"))
}

/// Parse one console line against the known switch slugs.
/// Returns None for blank lines, unknown services and stray arguments.
///
/// The service word must equal `<slug>_<service>` exactly. If two slugs
/// could both produce it, the longer slug wins, whatever order `slugs` is in.
pub fn parse(line: &str, slugs: &[String]) -> Option<Command> {
    let mut words = line.split(|c: char| c.is_whitespace() || c == ',').filter(|w| !w.is_empty());
    let service = words.next()?.to_ascii_lowercase();
    let args: Vec<String> = words.map(str::to_string).collect();

    let (slug, name) = slugs
        .iter()
        .flat_map(|slug| SERVICES.iter().map(move |name| (slug, *name)))
        .filter(|(slug, name)| service == format!("{slug}_{name}"))
        .max_by_key(|(slug, _)| slug.len())?;

    let call = match name {
        "force_update" => ServiceCall::ForceUpdate(if args.is_empty() { None } else { Some(args) }),
        _ if !args.is_empty() => return None,
        "update" => ServiceCall::Update,
        "turn_on" => ServiceCall::TurnOn,
        "turn_off" => ServiceCall::TurnOff,
        _ => ServiceCall::Status,
    };
    Some(Command {
        switch: slug.clone(),
        call,
    })
}
