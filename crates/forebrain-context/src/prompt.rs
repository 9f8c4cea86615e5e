use forebrain_core::FileRef;

/// Everything assembled for one model invocation, in the order it appears in
/// the developer message.
#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    pub operating_config: String,
    pub persona: String,
    pub long_term: String,
    pub short_term: String,
    pub conversation: String,
    pub refs: Vec<FileRef>,
    pub file_list: Vec<String>,
    pub list_truncated: bool,
}

fn push_section(out: &mut String, title: &str, body: &str) {
    out.push_str(title);
    out.push_str(":\n");
    if body.trim().is_empty() {
        out.push_str("(empty)\n\n");
    } else {
        out.push_str(body);
        out.push_str("\n\n");
    }
}

/// Build the developer message: context sections, the prompt, the file
/// shortlist and mentioned contents, then the response-contract instructions.
pub fn build_developer_message(bundle: &ContextBundle, prompt: &str) -> String {
    let mut b = String::new();
    b.push_str("You are forebrain, a minimal coding agent.\n");
    b.push_str("Stay concise and explicit.\n\n");

    push_section(&mut b, "Operating config (AGENT.md)", &bundle.operating_config);
    push_section(&mut b, "Personality (PERSONA.md)", &bundle.persona);
    push_section(&mut b, "Long-term memory", &bundle.long_term);
    push_section(&mut b, "Short-term memory (recent window)", &bundle.short_term);
    push_section(&mut b, "Recent conversation", &bundle.conversation);

    b.push_str("User prompt:\n");
    b.push_str(prompt);
    b.push_str("\n\n");

    b.push_str("Relevant repository files (shortlist, relative paths):\n");
    if bundle.file_list.is_empty() {
        b.push_str("(none)\n\n");
    } else {
        for f in &bundle.file_list {
            b.push_str("- ");
            b.push_str(f);
            b.push('\n');
        }
        if bundle.list_truncated {
            b.push_str("- ... (truncated)\n");
        }
        b.push('\n');
    }

    b.push_str("Mentioned files (contents provided below):\n");
    if bundle.refs.is_empty() {
        b.push_str("(none)\n\n");
    } else {
        for r in &bundle.refs {
            b.push_str("- ");
            b.push_str(&r.display_path());
            if let Some(err) = &r.error {
                b.push_str(": ");
                b.push_str(err);
            }
            b.push('\n');
        }
        b.push('\n');
        for r in &bundle.refs {
            let Some(content) = &r.content else { continue };
            b.push_str("### ");
            b.push_str(&r.path);
            b.push('\n');
            b.push_str(content);
            b.push_str("\n\n");
        }
    }

    b.push_str(
        "Respond with exactly one JSON object with these fields, all required:\n\
         - \"read\": array of relative paths whose contents you need before acting.\n\
         - \"patches\": array of {\"path\", \"diff\"} with a unified diff per file.\n\
         - \"writes\": array of {\"path\", \"content\"} for new files or full rewrites.\n\
         - \"deletes\": array of relative paths to remove.\n\
         - \"message\": your explanation for the user.\n\n\
         Prefer patches with the smallest possible unified diff when modifying existing files.\n\
         Use writes only for new files, or for a full replacement when explicitly requested.\n\
         Never assume file contents from filenames alone: if a change depends on contents you\n\
         were not given, list those paths in \"read\", leave patches/writes/deletes empty, and stop.\n\
         If file contents were withheld due to permissions, ask the user to approve reading them.\n",
    );
    b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sections_are_marked() {
        let msg = build_developer_message(&ContextBundle::default(), "hi");
        assert!(msg.contains("Operating config (AGENT.md):\n(empty)"));
        assert!(msg.contains("Relevant repository files (shortlist, relative paths):\n(none)"));
        assert!(msg.contains("User prompt:\nhi"));
    }

    #[test]
    fn loaded_refs_appear_with_contents() {
        let bundle = ContextBundle {
            refs: vec![
                FileRef::loaded("a.txt", "a.txt", "alpha".to_string()),
                FileRef::failed("b.txt", "b.txt", "not found"),
            ],
            file_list: vec!["a.txt".to_string()],
            list_truncated: true,
            ..Default::default()
        };
        let msg = build_developer_message(&bundle, "p");
        assert!(msg.contains("### a.txt\nalpha"));
        assert!(msg.contains("- b.txt: not found"));
        assert!(msg.contains("- ... (truncated)"));
        // Failed refs never contribute a contents block.
        assert!(!msg.contains("### b.txt"));
    }

    #[test]
    fn instructions_name_every_required_field() {
        let msg = build_developer_message(&ContextBundle::default(), "p");
        for field in ["\"read\"", "\"patches\"", "\"writes\"", "\"deletes\"", "\"message\""] {
            assert!(msg.contains(field), "missing {field}");
        }
    }
}
