mod recording;
mod security;
mod stream;
