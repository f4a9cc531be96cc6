// src/chat.rs
use eyre::Result;
use serde::{Deserialize, Serialize};

use crate::llm::{ChatTurn, TextGenerator};
use crate::models::WalletSnapshot;

pub const ANALYST_PROMPT: &str = "You are an expert blockchain analyst. Answer the user's \
questions directly and concisely. When data is given to you, synthesize it into a clear \
answer instead of repeating raw JSON. Amounts of ETH are in ether unless marked as wei.";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn chat(llm: &dyn TextGenerator, request: &ChatRequest) -> ChatResponse {
    let mut turns = request.chat_history.clone();
    turns.push(ChatTurn::user(request.message.clone()));
    match llm.generate(Some(ANALYST_PROMPT), &turns).await {
        Ok(text) => ChatResponse {
            success: true,
            response: Some(text),
            error: None,
        },
        Err(e) => ChatResponse {
            success: false,
            response: None,
            error: Some(e.to_string()),
        },
    }
}

fn summary_prompt(snapshot: &WalletSnapshot) -> String {
    let meta = &snapshot.metadata;
    let stats = &snapshot.derived_stats;
    let nfts = match &snapshot.nfts {
        Some(n) => format!("{} fetched of {} owned", n.fetched, n.total_count),
        None => "not available".to_string(),
    };
    format!(
        "Summarize this Ethereum wallet in a short paragraph.\n\
         Address: {}\nENS: {}\nETH balance: {}\nTransaction count: {}\n\
         ERC-20 tokens held: {}\nNFTs: {}\n\
         Transfers analysed: {} ({} unique transactions)\n\
         ETH in: {}\nETH out: {}\nNet ETH: {}\nToken contracts touched: {}",
        meta.address,
        meta.ens.as_deref().unwrap_or("none"),
        meta.eth_balance_formatted,
        meta.transaction_count,
        snapshot.token_balances.token_balances.len(),
        nfts,
        stats.total_transfers,
        stats.unique_transactions,
        stats.total_eth_in_formatted,
        stats.total_eth_out_formatted,
        stats.net_eth_formatted,
        stats.token_contracts.len(),
    )
}

/// Ask the model for a prose summary of an assembled wallet snapshot.
pub async fn summarize_wallet(llm: &dyn TextGenerator, snapshot: &WalletSnapshot) -> Result<String> {
    let turns = [ChatTurn::user(summary_prompt(snapshot))];
    llm.generate(Some(ANALYST_PROMPT), &turns).await
}
