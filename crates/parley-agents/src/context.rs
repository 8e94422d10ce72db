use parley_common::{Agent, Error, Message, Result, Role};

use crate::providers::ChatMessage;

/// Ordered provider context: the agent's system prompt (if any), prior
/// turns oldest first, then the new user message.
///
/// Stored history must only contain user and assistant turns; a stored
/// system message is rejected rather than passed along.
pub fn build(agent: &Agent, prior: &[Message], new_user_text: &str) -> Result<Vec<ChatMessage>> {
    let mut messages = Vec::with_capacity(prior.len() + 2);

    if let Some(prompt) = agent.system_prompt.as_deref()
        && !prompt.trim().is_empty()
    {
        messages.push(ChatMessage::new(Role::System, prompt));
    }

    for message in prior {
        if message.role == Role::System {
            return Err(Error::Agent(format!(
                "conversation {} contains a stored system message ({})",
                message.conversation_id, message.id
            )));
        }
        messages.push(ChatMessage::new(message.role, message.content.clone()));
    }

    messages.push(ChatMessage::new(Role::User, new_user_text));
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_common::{ConversationId, OwnerId};

    fn agent() -> Agent {
        Agent::new(OwnerId::from("u1"), "helper", "gpt-4o")
    }

    fn history(turns: &[(Role, &str)]) -> Vec<Message> {
        let conversation = ConversationId::from("c1");
        turns
            .iter()
            .map(|(role, text)| Message::new(conversation.clone(), *role, *text))
            .collect()
    }

    #[test]
    fn system_prompt_first_then_history_then_new_turn() {
        let agent = agent().with_system_prompt("Be brief.");
        let prior = history(&[(Role::User, "hi"), (Role::Assistant, "hello")]);

        let context = build(&agent, &prior, "how are you?").unwrap();
        assert_eq!(
            context,
            vec![
                ChatMessage::new(Role::System, "Be brief."),
                ChatMessage::new(Role::User, "hi"),
                ChatMessage::new(Role::Assistant, "hello"),
                ChatMessage::new(Role::User, "how are you?"),
            ]
        );
    }

    #[test]
    fn blank_system_prompt_is_omitted() {
        let blank = agent().with_system_prompt("   ");
        let context = build(&blank, &[], "hi").unwrap();
        assert_eq!(context, vec![ChatMessage::new(Role::User, "hi")]);

        let context = build(&agent(), &[], "hi").unwrap();
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn stored_system_message_is_an_integrity_error() {
        let prior = history(&[(Role::User, "hi"), (Role::System, "injected")]);
        let err = build(&agent(), &prior, "next").unwrap_err();
        assert!(matches!(err, Error::Agent(_)));
    }
}
