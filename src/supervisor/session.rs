//! 单用户会话：持有只追加的会话历史，每轮交给监督者路由

use std::sync::Arc;

use crate::memory::{ConversationState, ConversationTurn};
use crate::supervisor::{Routed, Supervisor};

pub struct Session {
    supervisor: Arc<Supervisor>,
    state: ConversationState,
}

impl Session {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            state: ConversationState::new(),
        }
    }

    /// 处理一条用户消息；依次记录用户原话、发给处理器的指令、处理器回复
    pub async fn send(&mut self, message: &str) -> String {
        let Routed {
            instruction, reply, ..
        } = self.supervisor.dispatch(&self.state, message).await;

        self.state.push(ConversationTurn::user(message));
        match instruction {
            Some(instruction) => {
                self.state.push(ConversationTurn::supervisor(instruction));
                self.state.push(ConversationTurn::handler(reply.clone()));
            }
            None => self.state.push(ConversationTurn::supervisor(reply.clone())),
        }
        reply
    }

    pub fn history(&self) -> &ConversationState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }
}
