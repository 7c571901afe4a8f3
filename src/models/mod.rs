pub mod game;
pub mod lobby;
pub mod question;
pub mod user;

pub use game::{Game, GameStatus, GameType, UserGame};
pub use lobby::{Lobby, LobbyState, PlayerData, UserId, STARTING_HP};
pub use question::{CorrectAnswer, Difficulty, FormattedQuestion, QuestionType};
pub use user::{User, USER_STARTING_RANK};
