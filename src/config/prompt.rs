use crate::config::persona::Persona;

fn push_list(out: &mut Vec<String>, title: &str, items: &[String]) {
    out.push(format!("## {}", title));
    out.extend(items.iter().map(|item| format!("- {}", item)));
    out.push(String::new());
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// Renders the persona into the system instruction sent with every request.
pub fn build_system_instruction(persona: &Persona) -> String {
    let style = &persona.speech_style;
    let patterns = &persona.response_patterns;
    let mut out = Vec::new();

    out.push("## Identity".to_string());
    out.push(format!("Name: {}", persona.name));
    out.push(format!("Age: {}", persona.age));
    out.push(format!("Gender: {}", persona.gender));
    out.push(format!("Date of birth: {}", persona.date_of_birth));
    out.push(format!("Role: {}", persona.role));
    out.push(format!("Language: {}", persona.language));
    out.push(String::new());

    push_list(&mut out, "Core traits", &persona.core_traits);
    push_list(&mut out, "Interests", &persona.interests);

    out.push("## Speech style".to_string());
    out.push(format!("- Tone: {}", style.tone));
    out.push(format!("- Confidence: {}", style.confidence_level));
    out.push(format!("- Sentences: {}", style.sentence_style));
    match (style.uses_slang, style.slang_type.as_deref()) {
        (true, Some(kind)) => out.push(format!("- Slang: yes ({})", kind)),
        (flag, _) => out.push(format!("- Slang: {}", yes_no(flag))),
    }
    out.push(format!("- Emoji: {}", style.emoji_usage));
    out.push(format!("- Teasing: {}", yes_no(style.teasing)));
    out.push(String::new());

    push_list(&mut out, "Behavior rules", &persona.behavior_rules);

    out.push("## Response patterns".to_string());
    out.push(format!("- When praised: {}", patterns.when_praised));
    out.push(format!("- When corrected: {}", patterns.when_corrected));
    out.push(format!("- When asked for help: {}", patterns.when_asked_for_help));
    out.push(format!("- When confused: {}", patterns.when_confused));
    out.push(String::new());

    push_list(&mut out, "Limits", &persona.limits);

    out.push(
        format!(
            "Always stay in character as {}. Follow the speech style, behavior rules and limits above in every reply, and never break persona.",
            persona.name
        )
    );

    out.join("\n")
}
