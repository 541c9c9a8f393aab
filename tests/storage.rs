use cowork::models::{Conversation, FunctionCall, Message, ToolCall};
use cowork::storage::ChatStorage;

fn sample_conversation() -> Conversation {
    let mut conversation = Conversation::new();
    conversation.messages.push(Message::user("rename the photos in ./album"));

    let mut assistant = Message::assistant("");
    assistant.content = None;
    assistant.reasoning = Some("The user wants batch renaming, list first.".to_string());
    assistant.tool_calls = Some(vec![ToolCall {
        id: "call_0".to_string(),
        tool_type: "function".to_string(),
        function: FunctionCall {
            name: "list_files".to_string(),
            arguments: "{\"path\":\"./album\"}".to_string(),
        },
    }]);
    conversation.messages.push(assistant);

    conversation
        .messages
        .push(Message::tool_result("call_0", "a.jpg\nb.jpg"));
    conversation
        .messages
        .push(Message::assistant("Found 2 photos, renaming them now."));
    conversation.derive_title();
    conversation
}

#[test]
fn round_trip_preserves_messages_exactly() {
    let mut storage = ChatStorage::in_memory().unwrap();
    let conversation = sample_conversation();
    storage.save_conversation(&conversation).unwrap();

    let loaded = storage.get_conversation(&conversation.id).unwrap().unwrap();
    assert_eq!(loaded.title, conversation.title);
    assert_eq!(loaded.status, "active");
    assert_eq!(loaded.messages, conversation.messages);
}

#[test]
fn resaving_replaces_messages_without_duplication() {
    let mut storage = ChatStorage::in_memory().unwrap();
    let mut conversation = sample_conversation();
    storage.save_conversation(&conversation).unwrap();

    conversation.messages.push(Message::user("thanks"));
    storage.save_conversation(&conversation).unwrap();

    let loaded = storage.get_conversation(&conversation.id).unwrap().unwrap();
    assert_eq!(loaded.messages.len(), conversation.messages.len());
    assert_eq!(loaded.messages, conversation.messages);
}

#[test]
fn missing_conversation_is_none() {
    let storage = ChatStorage::in_memory().unwrap();
    assert!(storage.get_conversation("nope").unwrap().is_none());
    assert!(!storage.has_conversation("nope").unwrap());
}

#[test]
fn list_reports_counts_and_titles() {
    let mut storage = ChatStorage::in_memory().unwrap();
    let conversation = sample_conversation();
    storage.save_conversation(&conversation).unwrap();

    let summaries = storage.list_conversations().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, conversation.id);
    assert_eq!(summaries[0].message_count, 4);
    assert!(summaries[0].title.starts_with("rename the photos"));
}

#[test]
fn delete_removes_conversation_and_messages() {
    let mut storage = ChatStorage::in_memory().unwrap();
    let conversation = sample_conversation();
    storage.save_conversation(&conversation).unwrap();

    assert!(storage.delete_conversation(&conversation.id).unwrap());
    assert!(!storage.has_conversation(&conversation.id).unwrap());
    assert!(storage.get_messages(&conversation.id).unwrap().is_empty());
    assert!(!storage.delete_conversation(&conversation.id).unwrap());
}

#[test]
fn search_matches_content_and_reasoning() {
    let mut storage = ChatStorage::in_memory().unwrap();
    let conversation = sample_conversation();
    storage.save_conversation(&conversation).unwrap();

    let hits = storage.search("renaming them now").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].conversation_id, conversation.id);

    let hits = storage.search("batch renaming").unwrap();
    assert_eq!(hits.len(), 1, "reasoning text should be searchable");

    assert!(storage.search("zebra stampede").unwrap().is_empty());
}

#[test]
fn clear_empties_the_store() {
    let mut storage = ChatStorage::in_memory().unwrap();
    storage.save_conversation(&sample_conversation()).unwrap();
    storage.save_conversation(&sample_conversation()).unwrap();
    storage.clear().unwrap();
    assert!(storage.list_conversations().unwrap().is_empty());
}
