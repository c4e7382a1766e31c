use std::path::Path;

pub const DEFAULT_ICON_KEY: &str = "presence";
pub const DEFAULT_ICON_TEXT: &str = "Presence";
pub const WORKING_ON_PRIVATE: &str = "Working on something private";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    pub name: String,
    /// Asset key derived from the language color: `#F1E05A` becomes `_f1e05a`.
    pub color_key: String,
}

// (extensions, display name, color)
const LANGUAGES: &[(&[&str], &str, &str)] = &[
    (&["rs"], "Rust", "#dea584"),
    (&["c", "h"], "C", "#555555"),
    (&["cc", "cpp", "cxx", "hh", "hpp", "hxx"], "C++", "#f34b7d"),
    (&["go"], "Go", "#00ADD8"),
    (&["py", "pyi"], "Python", "#3572A5"),
    (&["js", "mjs", "cjs", "jsx"], "JavaScript", "#f1e05a"),
    (&["ts", "tsx"], "TypeScript", "#3178c6"),
    (&["java"], "Java", "#b07219"),
    (&["kt", "kts"], "Kotlin", "#A97BFF"),
    (&["rb"], "Ruby", "#701516"),
    (&["php"], "PHP", "#4F5D95"),
    (&["cs"], "C#", "#178600"),
    (&["swift"], "Swift", "#F05138"),
    (&["lua"], "Lua", "#000080"),
    (&["sh", "bash", "zsh"], "Shell", "#89e051"),
    (&["html", "htm"], "HTML", "#e34c26"),
    (&["css", "scss"], "CSS", "#563d7c"),
    (&["md", "markdown"], "Markdown", "#083fa1"),
    (&["json"], "JSON", "#292929"),
    (&["toml"], "TOML", "#9c4221"),
    (&["yml", "yaml"], "YAML", "#cb171e"),
    (&["hs"], "Haskell", "#5e5086"),
    (&["ex", "exs"], "Elixir", "#6e4a7e"),
    (&["zig"], "Zig", "#ec915c"),
    (&["r"], "R", "#198CE7"),
];

// (lowercase editor names, icon key)
const EDITORS: &[(&[&str], &str)] = &[
    (&["visual studio code", "vscode", "code"], "vscode"),
    (&["neovim", "nvim"], "neovim"),
    (&["vim"], "vim"),
    (&["emacs"], "emacs"),
    (&["atom"], "atom"),
    (&["sublime text", "sublime"], "sublime"),
    (&["zed"], "zed"),
    (&["helix", "hx"], "helix"),
];

pub fn color_key(color: &str) -> String {
    let trimmed = color.trim();
    let body = trimmed.strip_prefix('#').unwrap_or(trimmed);
    format!("_{}", body.to_lowercase())
}

/// Looks up the language for a file path by extension. Paths without an
/// extension (including directories) yield `None`.
pub fn language_for_path(path: &Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    LANGUAGES
        .iter()
        .find(|(extensions, _, _)| extensions.contains(&ext.as_str()))
        .map(|(_, name, color)| Language {
            // single-character names are not shown by the host
            name: if name.chars().count() == 1 {
                format!("{name} ")
            } else {
                name.to_string()
            },
            color_key: color_key(color),
        })
}

pub fn editor_icon(editor_name: &str) -> Option<&'static str> {
    let needle = editor_name.trim().to_lowercase();
    EDITORS
        .iter()
        .find(|(names, _)| names.contains(&needle.as_str()))
        .map(|(_, icon)| *icon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_lookup_by_extension() {
        let lang = language_for_path(Path::new("/work/app/src/index.JS")).expect("js");
        assert_eq!(lang.name, "JavaScript");
        assert_eq!(lang.color_key, "_f1e05a");
        assert_eq!(language_for_path(Path::new("/work/app")), None);
        assert_eq!(language_for_path(Path::new("/work/app/notes.xyz")), None);
    }

    #[test]
    fn single_letter_language_is_padded() {
        let lang = language_for_path(Path::new("analysis.r")).expect("r");
        assert_eq!(lang.name, "R ");
        assert_eq!(lang.color_key, "_198ce7");
    }

    #[test]
    fn editor_icons_match_case_insensitively() {
        assert_eq!(editor_icon("Visual Studio Code"), Some("vscode"));
        assert_eq!(editor_icon(" NeoVim "), Some("neovim"));
        assert_eq!(editor_icon("notepad"), None);
    }
}
