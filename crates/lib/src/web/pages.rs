//! Embedded single-page HTML for the chat and archive views.

/// Chat playground: transcript, prompt input, archive button.
pub const CHAT_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Chat playground</title>
<style>
*{margin:0;padding:0;box-sizing:border-box}
body{background:#0e1117;color:#fafafa;font-family:system-ui,sans-serif;display:flex;flex-direction:column;height:100vh;padding:16px 24px;gap:12px}
header{display:flex;justify-content:space-between;align-items:center;border-bottom:2px solid #ff4b4b;padding-bottom:8px}
header h1{font-size:1.3rem}
header a{color:#ff9f9f}
.notice{padding:10px 14px;border-radius:6px;display:none}
.notice.show{display:block}
.notice.warn{background:#3d3a1a;color:#ffe08a}
.notice.error{background:#3d1a1a;color:#ff9f9f}
#transcript{flex:1;overflow-y:auto;border:1px solid #31333f;border-radius:8px;padding:12px;display:flex;flex-direction:column;gap:10px}
.turn{display:flex;gap:10px;align-items:flex-start}
.avatar{font-size:1.4rem}
.bubble{white-space:pre-wrap;word-wrap:break-word;line-height:1.5;background:#1a1c24;border-radius:8px;padding:8px 12px;max-width:90%}
.turn.assistant .bubble{background:#262730}
.time{font-size:.7rem;color:#888;margin-top:2px}
form{display:flex;gap:8px}
#prompt{flex:1;background:#262730;border:1px solid #31333f;color:#fafafa;padding:10px;border-radius:6px;font-size:1rem}
button{background:#ff4b4b;color:#fff;border:none;border-radius:6px;padding:8px 16px;cursor:pointer;font-size:.95rem}
button:disabled{background:#555;cursor:not-allowed}
#status{font-size:.8rem;color:#aaa;min-height:1em}
</style>
</head>
<body>
<header>
  <h1>💬 Chat playground</h1>
  <span id="model"></span>
  <a href="/archive">Chat archive →</a>
</header>
<div id="warning" class="notice warn"></div>
<div id="error" class="notice error"></div>
<div id="transcript"></div>
<div id="status"></div>
<form id="chat-form">
  <input id="prompt" autocomplete="off" placeholder="Enter a prompt here...">
  <button id="send" type="submit">Send</button>
</form>
<div><button id="archive" type="button">Archive Messages</button></div>
<script>
let sessionId = null;
let noModels = false;
const transcript = document.getElementById('transcript');

function avatar(role) { return role === 'assistant' ? '🤖' : '😎'; }

function addTurn(role, content, time) {
  const row = document.createElement('div');
  row.className = 'turn ' + role;
  const av = document.createElement('div');
  av.className = 'avatar';
  av.textContent = avatar(role);
  const col = document.createElement('div');
  const bubble = document.createElement('div');
  bubble.className = 'bubble';
  bubble.textContent = content;
  const ts = document.createElement('div');
  ts.className = 'time';
  ts.textContent = time || '';
  col.append(bubble, ts);
  row.append(av, col);
  transcript.append(row);
  transcript.scrollTop = transcript.scrollHeight;
  return { bubble, ts };
}

function show(id, text) {
  const el = document.getElementById(id);
  el.textContent = text || '';
  el.classList.toggle('show', !!text);
}

async function startSession() {
  const res = await fetch('/api/sessions', { method: 'POST' });
  sessionId = (await res.json()).sessionId;
}

async function loadModels() {
  try {
    const res = await fetch('/api/models');
    const data = await res.json();
    if (data.selected) document.getElementById('model').textContent = 'Model: ' + data.selected;
    if (data.error) { show('error', data.error); return; }
    noModels = data.models && data.models.length === 0;
    if (data.warning) show('warning', '⚠️ ' + data.warning + (data.installHint ? ' ' + data.installHint : ''));
    document.getElementById('send').disabled = noModels;
  } catch (e) {
    show('error', 'Could not load models: ' + e);
  }
}

function parseSse(block) {
  let event = 'message', data = '';
  for (const line of block.split('\n')) {
    if (line.startsWith('event:')) event = line.slice(6).trim();
    else if (line.startsWith('data:')) data += line.slice(5).trim();
  }
  return { event, data: data ? JSON.parse(data) : null };
}

async function send(prompt) {
  show('error', '');
  const res = await fetch('/api/sessions/' + sessionId + '/chat', {
    method: 'POST',
    headers: { 'Content-Type': 'application/json' },
    body: JSON.stringify({ prompt })
  });
  if (res.status === 204) return;
  if (!res.ok) {
    const body = await res.json().catch(() => ({ error: res.statusText }));
    show('error', '⛔️ ' + body.error + (body.installHint ? ' ' + body.installHint : ''));
    return;
  }
  addTurn('user', prompt, new Date().toLocaleString());
  const reply = addTurn('assistant', '', '');
  document.getElementById('status').textContent = 'model working...';
  const reader = res.body.getReader();
  const decoder = new TextDecoder();
  let buffer = '';
  for (;;) {
    const { value, done } = await reader.read();
    if (done) break;
    buffer += decoder.decode(value, { stream: true });
    let idx;
    while ((idx = buffer.indexOf('\n\n')) >= 0) {
      const block = buffer.slice(0, idx);
      buffer = buffer.slice(idx + 2);
      if (!block.trim() || block.startsWith(':')) continue;
      const ev = parseSse(block);
      if (ev.event === 'chunk') {
        reply.bubble.textContent += ev.data;
        transcript.scrollTop = transcript.scrollHeight;
      } else if (ev.event === 'done') {
        reply.ts.textContent = ev.data.timestamp;
      } else if (ev.event === 'error') {
        show('error', '⛔️ ' + ev.data);
      }
    }
  }
  document.getElementById('status').textContent = '';
}

document.getElementById('chat-form').addEventListener('submit', async (e) => {
  e.preventDefault();
  const input = document.getElementById('prompt');
  const prompt = input.value;
  if (!prompt.trim() || noModels) return;
  input.value = '';
  const btn = document.getElementById('send');
  btn.disabled = true;
  try { await send(prompt); } catch (err) { show('error', '⛔️ ' + err); }
  btn.disabled = noModels;
});

document.getElementById('archive').addEventListener('click', async () => {
  const res = await fetch('/api/sessions/' + sessionId + '/archive', { method: 'POST' });
  const body = await res.json();
  if (res.ok) show('warning', '📂 Archived to ' + body.path);
  else show('error', '⛔️ ' + body.error);
});

// A page kept in the back/forward cache comes back with the same session.
window.addEventListener('pagehide', (e) => {
  if (e.persisted || !sessionId) return;
  fetch('/api/sessions/' + sessionId, { method: 'DELETE', keepalive: true });
});

startSession().then(loadModels).catch((e) => show('error', 'Could not start session: ' + e));
</script>
</body>
</html>
"##;

/// Archive browser: file selector plus the rows of the selected file.
pub const ARCHIVE_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Chat Archive</title>
<style>
*{margin:0;padding:0;box-sizing:border-box}
body{background:#0e1117;color:#fafafa;font-family:system-ui,sans-serif;padding:16px 24px;display:flex;flex-direction:column;gap:12px}
header{display:flex;justify-content:space-between;align-items:center;border-bottom:2px solid #ff4b4b;padding-bottom:8px}
header a{color:#ff9f9f}
select{background:#262730;color:#fafafa;border:1px solid #31333f;border-radius:6px;padding:6px 10px;font-size:.95rem}
.info{background:#1a2a3d;color:#9fd0ff;padding:10px 14px;border-radius:6px}
.error{background:#3d1a1a;color:#ff9f9f;padding:10px 14px;border-radius:6px}
.row{border:1px solid #31333f;border-radius:8px;padding:10px 12px}
.role{font-weight:bold;margin-bottom:4px}
.time{font-size:.7rem;color:#888}
.content{white-space:pre-wrap;word-wrap:break-word;line-height:1.5}
</style>
</head>
<body>
<header>
  <h1>💬 Chat Archive</h1>
  <a href="/">← Chat playground</a>
</header>
<div id="picker"></div>
<div id="selected"></div>
<div id="rows"></div>
<script>
const picker = document.getElementById('picker');
const rows = document.getElementById('rows');

function message(cls, text) {
  const el = document.createElement('div');
  el.className = cls;
  el.textContent = text;
  return el;
}

async function loadFile(file) {
  rows.replaceChildren();
  document.getElementById('selected').textContent = 'Selected Chat Archive: ' + file;
  const res = await fetch('/api/archives/' + encodeURIComponent(file));
  const body = await res.json();
  if (!res.ok) { rows.append(message('error', '⛔️ ' + body.error)); return; }
  for (const r of body.rows) {
    const row = document.createElement('div');
    row.className = 'row';
    const avatar = r.role === 'assistant' ? '🤖' : '😎';
    row.append(
      message('role', avatar + ' ' + r.role),
      message('time', r.timestamp),
      message('content', r.content)
    );
    rows.append(row);
  }
}

async function init() {
  const res = await fetch('/api/archives');
  const body = await res.json();
  if (!res.ok) { picker.append(message('error', '⛔️ ' + body.error)); return; }
  if (body.files.length === 0) {
    picker.append(message('info', '📂 ' + (body.notice || 'No chat archives found.')));
    return;
  }
  const label = document.createElement('label');
  label.textContent = 'Select a chat archive: ';
  const select = document.createElement('select');
  for (const f of body.files) {
    const opt = document.createElement('option');
    opt.value = f;
    opt.textContent = f;
    select.append(opt);
  }
  select.addEventListener('change', () => loadFile(select.value));
  label.append(select);
  picker.append(label);
  loadFile(body.files[0]);
}

init();
</script>
</body>
</html>
"##;
