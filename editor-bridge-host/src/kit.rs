//! Built-in extensions
//!
//! The usual editor surface, split the way a host typically wants to pick it:
//! [`start_kit`] gives the common set, the individual constructors allow
//! trimming or configuring one piece. [`core`] is installed by every bridge;
//! an extension named [`CORE`] passed to the builder is merged into it.

use crate::extension::BridgeExtension;
use editor_bridge_api::{fields, ArgKind, ArgSpec, CommandSpec, ResultKind};

pub const CORE: &str = "core";
pub const PLACEHOLDER: &str = "placeholder";
pub const IMAGES: &str = "images";
pub const FORMATTING: &str = "formatting";
pub const LISTS: &str = "lists";
pub const HEADING: &str = "heading";
pub const HISTORY: &str = "history";
pub const LINK: &str = "link";
pub const COLOR: &str = "color";
pub const COUNTER: &str = "counter";

/// Command names used by the facade's convenience methods
pub mod commands {
    pub const FOCUS: &str = "focus";
    pub const BLUR: &str = "blur";
    pub const SET_CONTENT: &str = "setContent";
    pub const GET_CONTENT: &str = "getContent";
    pub const GET_TEXT: &str = "getText";
    pub const SET_EDITABLE: &str = "setEditable";
    pub const SET_PLACEHOLDER: &str = "setPlaceholder";
    pub const SET_IMAGE: &str = "setImage";
}

/// The common extension set on top of the base commands
pub fn start_kit() -> Vec<BridgeExtension> {
    vec![
        placeholder(),
        images(),
        formatting(),
        lists(),
        heading(),
        history(),
        link(),
        color(),
    ]
}

/// Base commands every bridge carries: focus, content and editability
///
/// Contributes the readiness and focus flags.
pub fn core() -> BridgeExtension {
    BridgeExtension::new(CORE)
        .command(
            CommandSpec::new(commands::FOCUS, "Focus the editor").arg(
                ArgSpec::new("position", ArgKind::Position)
                    .help("\"start\", \"end\", \"all\" or a document offset"),
            ),
        )
        .command(CommandSpec::new(commands::BLUR, "Remove focus from the editor"))
        .command(
            CommandSpec::new(commands::SET_CONTENT, "Replace the document")
                .arg(ArgSpec::string("html").required().help("Document markup")),
        )
        .command(
            CommandSpec::new(commands::GET_CONTENT, "Read the document as markup")
                .returns(ResultKind::Text),
        )
        .command(
            CommandSpec::new(commands::GET_TEXT, "Read the document as plain text")
                .returns(ResultKind::Text),
        )
        .command(
            CommandSpec::new(commands::SET_EDITABLE, "Toggle read-only mode")
                .arg(ArgSpec::bool("editable").required()),
        )
        .state_field(fields::IS_READY)
        .state_field(fields::IS_FOCUSED)
        .state_field(fields::CONTENT_CHANGED)
}

/// Overlay adding CSS to the editor document through the base extension
pub fn core_with_css(css: impl AsRef<str>) -> BridgeExtension {
    BridgeExtension::new(CORE).css(css)
}

/// Placeholder shown in an empty document
///
/// The initial text is the `placeholder` setting of [`BridgeConfig`](crate::BridgeConfig).
pub fn placeholder() -> BridgeExtension {
    BridgeExtension::new(PLACEHOLDER)
        .command(
            CommandSpec::new(commands::SET_PLACEHOLDER, "Change the placeholder text")
                .arg(ArgSpec::string("placeholder").required()),
        )
        .css(
            ".is-editor-empty:first-child::before { content: attr(data-placeholder); \
             float: left; height: 0; pointer-events: none; color: #adb5bd; }",
        )
}

pub fn images() -> BridgeExtension {
    BridgeExtension::new(IMAGES)
        .command(
            CommandSpec::new(commands::SET_IMAGE, "Insert an image at the selection")
                .arg(ArgSpec::string("src").required().help("Image URL or data URI")),
        )
        .css("img { max-width: 100%; height: auto; }")
}

/// Inline marks
pub fn formatting() -> BridgeExtension {
    let mut ext = BridgeExtension::new(FORMATTING);
    for mark in ["Bold", "Italic", "Underline", "Strike"] {
        ext = ext
            .command(CommandSpec::new(
                format!("toggle{}", mark),
                format!("Toggle {} on the selection", mark.to_lowercase()),
            ))
            .state_field(format!("is{}Active", mark))
            .state_field(format!("canToggle{}", mark));
    }
    ext
}

pub fn lists() -> BridgeExtension {
    BridgeExtension::new(LISTS)
        .command(CommandSpec::new("toggleBulletList", "Toggle a bullet list"))
        .command(CommandSpec::new("toggleOrderedList", "Toggle a numbered list"))
        .command(CommandSpec::new("sink", "Indent the current list item"))
        .command(CommandSpec::new("lift", "Outdent the current list item"))
        .state_field("isBulletListActive")
        .state_field("isOrderedListActive")
        .state_field("canSink")
        .state_field("canLift")
}

pub fn heading() -> BridgeExtension {
    BridgeExtension::new(HEADING)
        .command(
            CommandSpec::new("toggleHeading", "Toggle a heading block").arg(
                ArgSpec::integer("level")
                    .required()
                    .one_of(1..=6),
            ),
        )
        .state_field("headingLevel")
}

pub fn history() -> BridgeExtension {
    BridgeExtension::new(HISTORY)
        .command(CommandSpec::new("undo", "Undo the last change"))
        .command(CommandSpec::new("redo", "Redo the last undone change"))
        .state_field("canUndo")
        .state_field("canRedo")
}

pub fn link() -> BridgeExtension {
    BridgeExtension::new(LINK)
        .command(
            CommandSpec::new("setLink", "Link the selection").arg(ArgSpec::string("href").required()),
        )
        .command(CommandSpec::new("unsetLink", "Remove the link at the selection"))
        .state_field("isLinkActive")
        .state_field("activeLink")
}

/// Text color, as driven by a color keyboard
pub fn color() -> BridgeExtension {
    BridgeExtension::new(COLOR)
        .command(
            CommandSpec::new("setColor", "Color the selection")
                .arg(ArgSpec::string("color").required().help("CSS color")),
        )
        .command(CommandSpec::new("unsetColor", "Reset the selection color"))
        .command(
            CommandSpec::new("setHighlight", "Highlight the selection")
                .arg(ArgSpec::string("color").required()),
        )
        .state_field("activeColor")
        .state_field("activeHighlight")
}

/// Word and character counts pushed with every state update
pub fn counter() -> BridgeExtension {
    BridgeExtension::new(COUNTER)
        .state_field("wordCount")
        .state_field("characterCount")
        .script(
            "editorBridge.extendState((editor) => ({\n  \
             wordCount: editor.storage.characterCount.words(),\n  \
             characterCount: editor.storage.characterCount.characters(),\n}));",
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_start_kit_command_names_are_unique() {
        let mut seen = HashSet::new();
        for ext in std::iter::once(core()).chain(start_kit()) {
            for cmd in ext.commands() {
                assert!(seen.insert(cmd.name.clone()), "duplicate {}", cmd.name);
            }
        }
        assert!(seen.contains(commands::SET_CONTENT));
        assert!(seen.contains("toggleBold"));
        assert!(start_kit().iter().all(|ext| ext.name() != CORE));
    }

    #[test]
    fn test_core_owns_focus_flags() {
        let core = core();
        assert!(core.state_fields().iter().any(|f| f == fields::IS_FOCUSED));
        assert!(core.state_fields().iter().any(|f| f == fields::CONTENT_CHANGED));
    }

    #[test]
    fn test_core_with_css_is_an_overlay() {
        let ext = core_with_css("* { font-family: 'Rubik', sans-serif; }");
        assert_eq!(ext.name(), CORE);
        assert!(ext.commands().is_empty());
        assert!(ext.init().css.as_deref().unwrap().contains("Rubik"));
    }

    #[test]
    fn test_placeholder_carries_no_text() {
        let ext = placeholder();
        assert!(ext.config().is_none());
        assert!(ext.commands().iter().any(|c| c.name == commands::SET_PLACEHOLDER));
    }
}
